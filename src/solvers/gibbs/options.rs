#![allow(dead_code)]

use crate::error::{FactorGraphError, Result};

// Options of the Gibbs sampler
#[derive(Debug, Clone, PartialEq)]
pub struct GibbsOptions {
    num_samples: usize,
    updates_per_sample: Option<usize>, // overrides scans_per_sample when set
    scans_per_sample: usize,
    burn_in_updates: Option<usize>, // overrides burn_in_scans when set
    burn_in_scans: usize,
    num_restarts: usize,
    temper: bool,
    initial_temperature: f64,
    tempering_half_life_in_samples: f64,
    save_all_samples: bool,
    sample_history_limit: Option<usize>, // None = unbounded history
    save_all_scores: bool,
}

impl Default for GibbsOptions {
    fn default() -> Self {
        GibbsOptions {
            num_samples: 1000,
            updates_per_sample: None,
            scans_per_sample: 1,
            burn_in_updates: None,
            burn_in_scans: 10,
            num_restarts: 0,
            temper: false,
            initial_temperature: 1.,
            tempering_half_life_in_samples: 1.,
            save_all_samples: false,
            sample_history_limit: None,
            save_all_scores: false,
        }
    }
}

fn check_positive_count(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(FactorGraphError::InvalidArgument(format!(
            "{} must be positive",
            name
        )));
    }
    Ok(())
}

// Also rejects NaN
fn check_positive_finite(name: &str, value: f64) -> Result<()> {
    if !(value > 0. && value.is_finite()) {
        return Err(FactorGraphError::InvalidArgument(format!(
            "{} must be positive and finite, got {}",
            name, value
        )));
    }
    Ok(())
}

impl GibbsOptions {
    pub fn set_num_samples(&mut self, value: usize) -> &mut Self {
        self.num_samples = value;
        self
    }

    pub fn set_updates_per_sample(&mut self, value: usize) -> Result<&mut Self> {
        check_positive_count("updates per sample", value)?;
        self.updates_per_sample = Some(value);
        Ok(self)
    }

    pub fn set_scans_per_sample(&mut self, value: usize) -> Result<&mut Self> {
        check_positive_count("scans per sample", value)?;
        self.updates_per_sample = None;
        self.scans_per_sample = value;
        Ok(self)
    }

    pub fn set_burn_in_updates(&mut self, value: usize) -> &mut Self {
        self.burn_in_updates = Some(value);
        self
    }

    pub fn set_burn_in_scans(&mut self, value: usize) -> &mut Self {
        self.burn_in_updates = None;
        self.burn_in_scans = value;
        self
    }

    pub fn set_num_restarts(&mut self, value: usize) -> &mut Self {
        self.num_restarts = value;
        self
    }

    pub fn set_temper(&mut self, value: bool) -> &mut Self {
        self.temper = value;
        self
    }

    pub fn set_initial_temperature(&mut self, value: f64) -> Result<&mut Self> {
        check_positive_finite("initial temperature", value)?;
        self.initial_temperature = value;
        Ok(self)
    }

    pub fn set_tempering_half_life_in_samples(&mut self, value: f64) -> Result<&mut Self> {
        check_positive_finite("tempering half-life", value)?;
        self.tempering_half_life_in_samples = value;
        Ok(self)
    }

    pub fn set_save_all_samples(&mut self, value: bool) -> &mut Self {
        self.save_all_samples = value;
        self
    }

    pub fn set_sample_history_limit(&mut self, value: Option<usize>) -> &mut Self {
        self.sample_history_limit = value;
        self
    }

    pub fn set_save_all_scores(&mut self, value: bool) -> &mut Self {
        self.save_all_scores = value;
        self
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    // Single-variable updates between two samples for a graph of `num_variables` variables
    pub fn updates_per_sample(&self, num_variables: usize) -> usize {
        self.updates_per_sample
            .unwrap_or(self.scans_per_sample * num_variables)
    }

    pub fn burn_in_updates(&self, num_variables: usize) -> usize {
        self.burn_in_updates
            .unwrap_or(self.burn_in_scans * num_variables)
    }

    pub fn num_restarts(&self) -> usize {
        self.num_restarts
    }

    pub fn temper(&self) -> bool {
        self.temper
    }

    pub fn initial_temperature(&self) -> f64 {
        self.initial_temperature
    }

    pub fn tempering_half_life_in_samples(&self) -> f64 {
        self.tempering_half_life_in_samples
    }

    // Factor applied to the temperature after each sample
    pub fn temperature_decay(&self) -> f64 {
        0.5f64.powf(1. / self.tempering_half_life_in_samples)
    }

    pub fn save_all_samples(&self) -> bool {
        self.save_all_samples
    }

    pub fn sample_history_limit(&self) -> Option<usize> {
        self.sample_history_limit
    }

    pub fn save_all_scores(&self) -> bool {
        self.save_all_scores
    }
}
