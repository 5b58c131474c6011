use log::debug;

use crate::{
    error::{FactorGraphError, Result},
    model::{factor_graph::FactorGraph, graph_model::TableId},
};

use super::parameter_estimator::{ParameterUpdate, TableFactors};

// Expectation-maximization on directed tables: new weights are the summed factor beliefs,
// re-normalized per directed-from group
#[derive(Debug, Default, Clone)]
pub struct BaumWelch;

impl ParameterUpdate for BaumWelch {
    fn name(&self) -> &'static str {
        "BaumWelch"
    }

    fn prepare(&mut self, graph: &FactorGraph, table_factors: &TableFactors) -> Result<()> {
        for (table, factors) in table_factors {
            let mut direction: Option<&[usize]> = None;
            for factor in factors {
                let directed_to = graph.model().factor(*factor)?.directed_to().ok_or(
                    FactorGraphError::InvalidArgument(format!(
                        "factor {} sharing table {} is not directed",
                        factor.index(),
                        table.index()
                    )),
                )?;
                match direction {
                    None => direction = Some(directed_to),
                    Some(first) if first != directed_to => {
                        return Err(FactorGraphError::InvalidArgument(format!(
                            "factors sharing table {} have different directions",
                            table.index()
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    fn step(
        &mut self,
        graph: &mut FactorGraph,
        tables: &[TableId],
        table_factors: &TableFactors,
    ) -> Result<()> {
        graph.solve()?;
        for table in tables {
            let Some(factors) = table_factors.get(table).filter(|factors| !factors.is_empty()) else {
                continue;
            };
            let old = graph.table(*table)?;
            let mut sums = vec![0.; old.num_rows()];
            for factor in factors {
                for (sum, probability) in sums.iter_mut().zip(graph.factor_belief(*factor)?) {
                    *sum += probability;
                }
            }
            // Groups the beliefs never reach keep their previous weights
            for group in old.directed_groups() {
                if group.iter().all(|row| sums[*row] == 0.) {
                    debug!("Table {}: keeping a group without belief mass", table.index());
                    for row in group {
                        sums[row] = old.weight(row);
                    }
                }
            }
            let table = graph.table_mut(*table)?;
            table.change_weights(sums)?;
            table.normalize()?;
        }
        Ok(())
    }
}
