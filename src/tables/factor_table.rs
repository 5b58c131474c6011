#![allow(dead_code)]

use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    fmt::Display,
    hash::{Hash, Hasher},
};

use log::debug;
use ndarray::{Array2, ArrayView1};

use crate::{
    data_structures::random_stream::RandomStream,
    error::{FactorGraphError, Result},
    factor_functions::factor_function::FactorFunction,
    model::{domain::DiscreteDomain, value::Value},
};

// Sparse table of non-negative weights over joint index tuples of discrete domains
#[derive(Debug, Clone)]
pub struct FactorTable {
    domain_sizes: Vec<usize>,             // size of the domain of each column
    indices: Array2<usize>,               // one row per stored tuple, one column per argument
    weights: Vec<f64>,                    // weight of each row
    lookup: HashMap<Vec<usize>, usize>,   // index tuple -> row
    directed_to: Option<Vec<usize>>,      // output columns, if the table is a conditional
    directed_from: Option<Vec<usize>>,    // input columns, complement of `directed_to`
}

impl FactorTable {
    // Creates a table from explicit rows; zero-weight rows are dropped
    pub fn new(domain_sizes: Vec<usize>, rows: Vec<Vec<usize>>, weights: Vec<f64>) -> Result<Self> {
        if rows.len() != weights.len() {
            return Err(FactorGraphError::DimensionMismatch {
                expected: rows.len(),
                got: weights.len(),
            });
        }
        let arity = domain_sizes.len();
        let mut kept_rows = Vec::with_capacity(rows.len());
        let mut kept_weights = Vec::with_capacity(weights.len());
        for (row, weight) in rows.into_iter().zip(weights) {
            if row.len() != arity {
                return Err(FactorGraphError::DimensionMismatch {
                    expected: arity,
                    got: row.len(),
                });
            }
            if let Some((column, index)) = row
                .iter()
                .enumerate()
                .find(|(column, index)| **index >= domain_sizes[*column])
            {
                return Err(FactorGraphError::InvalidArgument(format!(
                    "index {} is out of range for column {} of size {}",
                    index, column, domain_sizes[column]
                )));
            }
            check_weight(weight)?;
            if weight > 0. {
                kept_rows.push(row);
                kept_weights.push(weight);
            }
        }
        FactorTable::from_parts(domain_sizes, kept_rows, kept_weights)
    }

    // Creates a table from weights listed in row-major order over the full Cartesian product
    pub fn dense(domain_sizes: Vec<usize>, weights: Vec<f64>) -> Result<Self> {
        let expected = domain_sizes.iter().product::<usize>();
        if weights.len() != expected {
            return Err(FactorGraphError::DimensionMismatch {
                expected,
                got: weights.len(),
            });
        }
        let mut rows = Vec::with_capacity(expected);
        let mut tuple = vec![0; domain_sizes.len()];
        for _ in 0..expected {
            rows.push(tuple.clone());
            advance(&mut tuple, &domain_sizes);
        }
        FactorTable::new(domain_sizes, rows, weights)
    }

    // Tabulates a factor function over the Cartesian product of the given domains
    pub fn from_function(function: &dyn FactorFunction, domains: &[&DiscreteDomain]) -> Result<Self> {
        let domain_sizes = domains.iter().map(|domain| domain.size()).collect::<Vec<_>>();
        let total = domain_sizes.iter().product::<usize>();
        debug!(
            "Tabulating {} over {} joint assignments",
            function.name(),
            total
        );

        let mut rows = Vec::new();
        let mut weights = Vec::new();
        let mut tuple = vec![0; domains.len()];
        let mut arguments = domains
            .iter()
            .map(|domain| domain.elements()[0].clone())
            .collect::<Vec<Value>>();
        for _ in 0..total {
            for (column, domain) in domains.iter().enumerate() {
                arguments[column] = domain.elements()[tuple[column]].clone();
            }
            let energy = function.eval_energy(&arguments)?;
            if energy.is_nan() {
                return Err(FactorGraphError::NonFinite(format!(
                    "energy of {} at {:?}",
                    function.name(),
                    tuple
                )));
            }
            let weight = (-energy).exp();
            if weight > 0. {
                rows.push(tuple.clone());
                weights.push(weight);
            }
            advance(&mut tuple, &domain_sizes);
        }
        FactorTable::new(domain_sizes, rows, weights)
    }

    fn from_parts(domain_sizes: Vec<usize>, rows: Vec<Vec<usize>>, weights: Vec<f64>) -> Result<Self> {
        let arity = domain_sizes.len();
        let mut lookup = HashMap::with_capacity(rows.len());
        let mut indices = Array2::zeros((rows.len(), arity));
        for (row_index, row) in rows.into_iter().enumerate() {
            for (column, index) in row.iter().enumerate() {
                indices[[row_index, column]] = *index;
            }
            if lookup.insert(row, row_index).is_some() {
                return Err(FactorGraphError::InvalidArgument(
                    "duplicate row in factor table".to_string(),
                ));
            }
        }
        Ok(FactorTable {
            domain_sizes,
            indices,
            weights,
            lookup,
            directed_to: None,
            directed_from: None,
        })
    }

    pub fn arity(&self) -> usize {
        self.domain_sizes.len()
    }

    pub fn num_rows(&self) -> usize {
        self.weights.len()
    }

    pub fn domain_sizes(&self) -> &[usize] {
        &self.domain_sizes
    }

    pub fn indices(&self) -> &Array2<usize> {
        &self.indices
    }

    pub fn row(&self, row: usize) -> ArrayView1<usize> {
        self.indices.row(row)
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn weight(&self, row: usize) -> f64 {
        self.weights[row]
    }

    // Row holding the given index tuple, if it is stored
    pub fn weight_index(&self, tuple: &[usize]) -> Option<usize> {
        self.lookup.get(tuple).copied()
    }

    // Negative log weight of a tuple; absent tuples are impossible
    pub fn energy(&self, tuple: &[usize]) -> f64 {
        match self.weight_index(tuple) {
            Some(row) => -self.weights[row].ln(),
            None => f64::INFINITY,
        }
    }

    pub fn is_directed(&self) -> bool {
        self.directed_to.is_some()
    }

    pub fn directed_to(&self) -> Option<&[usize]> {
        self.directed_to.as_deref()
    }

    pub fn directed_from(&self) -> Option<&[usize]> {
        self.directed_from.as_deref()
    }

    // Marks the table as a conditional distribution of `to` given `from` and normalizes it
    pub fn set_directed(&mut self, to: Vec<usize>, from: Vec<usize>) -> Result<()> {
        let mut seen = vec![false; self.arity()];
        for column in to.iter().chain(&from) {
            if *column >= self.arity() {
                return Err(FactorGraphError::InvalidDirectedIndex {
                    index: *column,
                    num_edges: self.arity(),
                });
            }
            if seen[*column] {
                return Err(FactorGraphError::DuplicateDirectedIndex(*column));
            }
            seen[*column] = true;
        }
        if let Some(missing) = seen.iter().position(|seen| !seen) {
            return Err(FactorGraphError::InvalidArgument(format!(
                "column {} is neither directed-to nor directed-from",
                missing
            )));
        }
        self.directed_to = Some(to);
        self.directed_from = Some(from);
        self.normalize()
    }

    pub fn clear_directed(&mut self) {
        self.directed_to = None;
        self.directed_from = None;
    }

    // Rows grouped by the values of their directed-from columns
    pub fn directed_groups(&self) -> Vec<Vec<usize>> {
        let Some(from) = &self.directed_from else {
            return vec![(0..self.num_rows()).collect()];
        };
        let mut groups: HashMap<Vec<usize>, usize> = HashMap::new();
        let mut result: Vec<Vec<usize>> = Vec::new();
        for row in 0..self.num_rows() {
            let key = from
                .iter()
                .map(|column| self.indices[[row, *column]])
                .collect::<Vec<_>>();
            let group = *groups.entry(key).or_insert_with(|| {
                result.push(Vec::new());
                result.len() - 1
            });
            result[group].push(row);
        }
        result
    }

    // Scales weights to sum to one, per directed-from group when the table is directed
    pub fn normalize(&mut self) -> Result<()> {
        for group in self.directed_groups() {
            let total = group.iter().map(|row| self.weights[*row]).sum::<f64>();
            if !(total > 0.) || !total.is_finite() {
                return Err(FactorGraphError::ZeroWeightGroup);
            }
            for row in group {
                self.weights[row] /= total;
            }
        }
        Ok(())
    }

    pub fn change_weights(&mut self, weights: Vec<f64>) -> Result<()> {
        if weights.len() != self.num_rows() {
            return Err(FactorGraphError::DimensionMismatch {
                expected: self.num_rows(),
                got: weights.len(),
            });
        }
        for weight in &weights {
            check_weight(*weight)?;
        }
        self.weights = weights;
        Ok(())
    }

    pub fn change_weight(&mut self, row: usize, weight: f64) -> Result<()> {
        check_weight(weight)?;
        let slot = self.weights.get_mut(row).ok_or(FactorGraphError::UnknownNode {
            kind: "table row",
            index: row,
        })?;
        *slot = weight;
        Ok(())
    }

    // Draws every weight uniformly from (0, 1]; callers renormalize when needed
    pub fn randomize_weights(&mut self, random: &mut RandomStream) {
        for weight in self.weights.iter_mut() {
            *weight = random.next_positive_f64();
        }
    }

    pub fn copy_from(&mut self, other: &FactorTable) {
        self.clone_from(other);
    }

    // Joint table over `num_columns` columns: `self` occupies `self_columns`, `other` occupies `other_columns`.
    // Rows are combined when they agree on shared columns and their weights multiply.
    pub fn product(
        &self,
        self_columns: &[usize],
        other: &FactorTable,
        other_columns: &[usize],
        domain_sizes: Vec<usize>,
    ) -> Result<FactorTable> {
        if self_columns.len() != self.arity() || other_columns.len() != other.arity() {
            return Err(FactorGraphError::DimensionMismatch {
                expected: self.arity() + other.arity(),
                got: self_columns.len() + other_columns.len(),
            });
        }
        for (columns, table) in [(self_columns, self), (other_columns, other)] {
            for (position, column) in columns.iter().enumerate() {
                if domain_sizes.get(*column) != Some(&table.domain_sizes[position]) {
                    return Err(FactorGraphError::IncompatibleDomains(format!(
                        "column {} does not match the joint domain sizes",
                        column
                    )));
                }
            }
        }

        let mut rows = Vec::new();
        let mut weights = Vec::new();
        for a in 0..self.num_rows() {
            let mut tuple = vec![usize::MAX; domain_sizes.len()];
            for (position, column) in self_columns.iter().enumerate() {
                tuple[*column] = self.indices[[a, position]];
            }
            'rows: for b in 0..other.num_rows() {
                let mut joint = tuple.clone();
                for (position, column) in other_columns.iter().enumerate() {
                    let index = other.indices[[b, position]];
                    if joint[*column] != usize::MAX && joint[*column] != index {
                        continue 'rows;
                    }
                    joint[*column] = index;
                }
                if joint.contains(&usize::MAX) {
                    return Err(FactorGraphError::InvalidArgument(
                        "joint columns are not covered by either table".to_string(),
                    ));
                }
                rows.push(joint);
                weights.push(self.weights[a] * other.weights[b]);
            }
        }
        FactorTable::new(domain_sizes, rows, weights)
    }

    // Hash of sizes, rows, and weight bits, used to deduplicate equal tables
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.domain_sizes.hash(&mut hasher);
        for row in self.indices.rows() {
            for index in row {
                index.hash(&mut hasher);
            }
        }
        for weight in &self.weights {
            weight.to_bits().hash(&mut hasher);
        }
        self.directed_to.hash(&mut hasher);
        hasher.finish()
    }
}

fn check_weight(weight: f64) -> Result<()> {
    if !weight.is_finite() || weight < 0. {
        return Err(FactorGraphError::NonFinite(format!(
            "factor table weight {}",
            weight
        )));
    }
    Ok(())
}

// Advances `tuple` to the next element of the Cartesian product, last column fastest
pub(crate) fn advance(tuple: &mut [usize], domain_sizes: &[usize]) {
    for column in (0..tuple.len()).rev() {
        tuple[column] += 1;
        if tuple[column] < domain_sizes[column] {
            return;
        }
        // Carry over
        tuple[column] = 0;
    }
}

impl Display for FactorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (row, weight) in self.indices.rows().into_iter().zip(&self.weights) {
            writeln!(f, "{:?} {}", row.to_vec(), weight)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor_functions::{and::And, factor_function::FactorFunction};

    #[test]
    fn directed_normalization_sums_to_one_per_group() {
        let mut table = FactorTable::dense(vec![2, 3], vec![1., 2., 3., 4., 0., 4.]).unwrap();
        assert_eq!(table.num_rows(), 5);
        table.set_directed(vec![1], vec![0]).unwrap();
        for group in table.directed_groups() {
            let total: f64 = group.iter().map(|row| table.weight(*row)).sum();
            assert!((total - 1.).abs() < 1e-12);
        }
        assert!((table.weight(table.weight_index(&[1, 2]).unwrap()) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn zero_weight_group_is_an_error() {
        let mut table = FactorTable::dense(vec![2, 2], vec![1., 1., 1., 1.]).unwrap();
        table.change_weights(vec![0., 0., 1., 1.]).unwrap();
        assert_eq!(
            table.set_directed(vec![1], vec![0]),
            Err(FactorGraphError::ZeroWeightGroup)
        );
    }

    #[test]
    fn invalid_directed_columns() {
        let mut table = FactorTable::dense(vec![2, 2], vec![1.; 4]).unwrap();
        assert!(matches!(
            table.set_directed(vec![2], vec![0]),
            Err(FactorGraphError::InvalidDirectedIndex { .. })
        ));
        assert_eq!(
            table.set_directed(vec![0], vec![0]),
            Err(FactorGraphError::DuplicateDirectedIndex(0))
        );
    }

    #[test]
    fn tabulated_function_is_sparse() {
        let bit = DiscreteDomain::bit();
        let table = FactorTable::from_function(&And, &[&bit, &bit, &bit]).unwrap();
        // one consistent output per input combination
        assert_eq!(table.num_rows(), 4);
        assert_eq!(table.energy(&[1, 1, 1]), 0.);
        assert_eq!(table.energy(&[1, 0, 1]), f64::INFINITY);
        assert!(And.is_directed());
    }

    #[test]
    fn product_of_tables() {
        let a = FactorTable::dense(vec![2, 2], vec![1., 2., 3., 4.]).unwrap();
        let b = FactorTable::dense(vec![2, 2], vec![5., 6., 7., 8.]).unwrap();
        // a over (x, y), b over (y, z)
        let joint = a.product(&[0, 1], &b, &[1, 2], vec![2, 2, 2]).unwrap();
        assert_eq!(joint.num_rows(), 8);
        let row = joint.weight_index(&[1, 0, 1]).unwrap();
        assert_eq!(joint.weight(row), 3. * 6.);
    }

    #[test]
    fn randomized_weights_are_positive() {
        let mut table = FactorTable::dense(vec![3], vec![1.; 3]).unwrap();
        table.randomize_weights(&mut RandomStream::seeded(3));
        assert!(table.weights().iter().all(|weight| *weight > 0. && *weight <= 1.));
    }
}
