use std::collections::VecDeque;

use log::{debug, info};

use crate::{
    error::{FactorGraphError, Result},
    solvers::solver::{Solver, SolverGraph},
    tables::factor_table::FactorTable,
};

use super::{
    domain::Domain,
    graph_model::{
        EdgeId, FactorId, GraphId, GraphModel, NodeMap, StructureChange, TableId, VariableId,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub(crate) usize);

impl StreamId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepeatedGraphId(pub(crate) usize);

impl RepeatedGraphId {
    pub fn index(self) -> usize {
        self.0
    }
}

// Binds one boundary variable of a repeated template to a stream: copy `i` of the template
// sees the stream variable at window position `i + offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSlice {
    pub stream: StreamId,
    pub offset: usize,
}

impl StreamSlice {
    pub fn new(stream: StreamId, offset: usize) -> Self {
        StreamSlice { stream, offset }
    }
}

// Unary factor on the first window variable summarizing the copies that left the window
#[derive(Debug, Clone, Copy)]
struct BlastFactor {
    factor: FactorId,
    table: TableId,
}

#[derive(Debug, Clone)]
struct VariableStream {
    domain: Domain,
    variables: Vec<VariableId>,       // window, oldest first
    source: Option<VecDeque<Vec<f64>>>, // inputs of the variables still to enter the window
    sink: Option<Vec<Vec<f64>>>,        // beliefs of the variables that left the window
    blast: Option<BlastFactor>,
    owner: Option<RepeatedGraphId>,
}

#[derive(Debug, Clone)]
struct RepeatedGraph {
    template: GraphModel,
    copies: Vec<(GraphId, NodeMap)>, // oldest first
}

// Solver state moves performed by one advance of the window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamShift {
    pub(crate) edges: Vec<(EdgeId, EdgeId)>,             // (old, new)
    pub(crate) variables: Vec<(VariableId, VariableId)>, // (from, to)
    pub(crate) fresh: Vec<VariableId>,                   // variables that entered the window
}

// Variable streams and the sliding-window graphs built over them
#[derive(Debug, Clone, Default)]
pub(crate) struct Streams {
    streams: Vec<VariableStream>,
    repeated: Vec<RepeatedGraph>,
    num_advances: u64,
}

impl Streams {
    fn stream(&self, stream: StreamId) -> Result<&VariableStream> {
        self.streams.get(stream.0).ok_or(FactorGraphError::UnknownNode {
            kind: "stream",
            index: stream.0,
        })
    }

    fn stream_mut(&mut self, stream: StreamId) -> Result<&mut VariableStream> {
        self.streams.get_mut(stream.0).ok_or(FactorGraphError::UnknownNode {
            kind: "stream",
            index: stream.0,
        })
    }

    fn repeated(&self, repeated: RepeatedGraphId) -> Result<&RepeatedGraph> {
        self.repeated.get(repeated.0).ok_or(FactorGraphError::UnknownNode {
            kind: "repeated graph",
            index: repeated.0,
        })
    }

    pub(crate) fn add_stream(&mut self, domain: Domain) -> Result<StreamId> {
        if !domain.is_discrete() {
            return Err(FactorGraphError::InvalidArgument(
                "streams need a discrete domain".to_string(),
            ));
        }
        self.streams.push(VariableStream {
            domain,
            variables: Vec::new(),
            source: None,
            sink: None,
            blast: None,
            owner: None,
        });
        Ok(StreamId(self.streams.len() - 1))
    }

    pub(crate) fn variables(&self, stream: StreamId) -> Result<&[VariableId]> {
        Ok(&self.stream(stream)?.variables)
    }

    pub(crate) fn blast_factor(&self, stream: StreamId) -> Result<Option<FactorId>> {
        Ok(self.stream(stream)?.blast.map(|blast| blast.factor))
    }

    pub(crate) fn is_blast_factor(&self, factor: FactorId) -> bool {
        self.streams
            .iter()
            .any(|stream| stream.blast.map_or(false, |blast| blast.factor == factor))
    }

    pub(crate) fn copies(&self, repeated: RepeatedGraphId) -> Result<&[(GraphId, NodeMap)]> {
        Ok(&self.repeated(repeated)?.copies)
    }

    pub(crate) fn num_advances(&self) -> u64 {
        self.num_advances
    }

    // Starts recording the belief of every variable that leaves the window
    pub(crate) fn enable_sink(&mut self, stream: StreamId) -> Result<()> {
        let stream = self.stream_mut(stream)?;
        if stream.sink.is_none() {
            stream.sink = Some(Vec::new());
        }
        Ok(())
    }

    pub(crate) fn sink(&self, stream: StreamId) -> Result<&[Vec<f64>]> {
        Ok(self.stream(stream)?.sink.as_deref().unwrap_or(&[]))
    }

    // Inputs for the stream's variables in order: the current window is filled first and the
    // rest enter one per advance
    pub(crate) fn set_data(
        &mut self,
        model: &mut GraphModel,
        stream: StreamId,
        data: Vec<Vec<f64>>,
    ) -> Result<()> {
        let size = self.stream(stream)?.domain.as_discrete()?.size();
        if let Some(bad) = data.iter().find(|input| input.len() != size) {
            return Err(FactorGraphError::DimensionMismatch {
                expected: size,
                got: bad.len(),
            });
        }
        let stream = self.stream_mut(stream)?;
        stream.source = Some(data.into());
        Streams::fill_window(model, stream)
    }

    fn fill_window(model: &mut GraphModel, stream: &mut VariableStream) -> Result<()> {
        if let Some(source) = stream.source.as_mut() {
            for variable in &stream.variables {
                match source.pop_front() {
                    Some(input) => model.set_variable_input(*variable, &input)?,
                    None => break,
                }
            }
        }
        Ok(())
    }

    // True while every stream that has data still has inputs queued
    pub(crate) fn has_next(&self) -> bool {
        !self.repeated.is_empty()
            && self.streams.iter().all(|stream| {
                stream
                    .source
                    .as_ref()
                    .map_or(true, |source| !source.is_empty())
            })
    }

    // Nests `buffer_size` copies of `template` in `root`, copy `i` bound to the stream
    // variables at `i + offset` for each slice
    pub(crate) fn add_repeated_graph(
        &mut self,
        model: &mut GraphModel,
        template: &GraphModel,
        buffer_size: usize,
        slices: &[StreamSlice],
    ) -> Result<(RepeatedGraphId, StructureChange)> {
        if buffer_size == 0 {
            return Err(FactorGraphError::InvalidArgument(
                "a repeated graph needs a buffer of at least one copy".to_string(),
            ));
        }
        let boundary = template.boundary_variables(template.root())?;
        if boundary.len() != slices.len() {
            return Err(FactorGraphError::DimensionMismatch {
                expected: boundary.len(),
                got: slices.len(),
            });
        }
        let id = RepeatedGraphId(self.repeated.len());
        for (position, slice) in slices.iter().enumerate() {
            if slice.offset > 1 {
                return Err(FactorGraphError::InvalidArgument(format!(
                    "stream offset {} is not 0 or 1",
                    slice.offset
                )));
            }
            if slices[..position].contains(slice) {
                return Err(FactorGraphError::InvalidArgument(format!(
                    "stream {} is bound twice at offset {}",
                    slice.stream.index(),
                    slice.offset
                )));
            }
            let stream = self.stream(slice.stream)?;
            if stream.owner.is_some() {
                return Err(FactorGraphError::InvalidArgument(format!(
                    "stream {} already feeds another repeated graph",
                    slice.stream.index()
                )));
            }
            if template.variable(boundary[position])?.domain() != &stream.domain {
                return Err(FactorGraphError::IncompatibleDomains(format!(
                    "boundary variable {} does not match stream {}",
                    position,
                    slice.stream.index()
                )));
            }
        }

        let root = model.root();
        let mut change = StructureChange::default();
        let mut used = slices.iter().map(|slice| slice.stream).collect::<Vec<_>>();
        used.sort();
        used.dedup();
        for stream_id in &used {
            let offsets = slices
                .iter()
                .filter(|slice| slice.stream == *stream_id)
                .map(|slice| slice.offset)
                .collect::<Vec<_>>();
            let length = buffer_size + offsets.iter().max().copied().unwrap_or(0);
            let stream = self.stream_mut(*stream_id)?;
            stream.owner = Some(id);
            for _ in 0..length {
                let variable = model.add_variable(root, None, stream.domain.clone())?;
                change.touched.push(variable.node());
                stream.variables.push(variable);
            }
            Streams::fill_window(model, stream)?;
        }

        let mut copies = Vec::with_capacity(buffer_size);
        for copy in 0..buffer_size {
            let outer = slices
                .iter()
                .map(|slice| Ok(self.stream(slice.stream)?.variables[copy + slice.offset]))
                .collect::<Result<Vec<_>>>()?;
            let (graph, map, added) = model.add_graph(template, &outer, root, None)?;
            change.merge(added);
            copies.push((graph, map));
        }

        // Streams carried from one copy to the next get a blast factor on their first variable
        for stream_id in &used {
            let carried = [0, 1].iter().all(|offset| {
                slices
                    .iter()
                    .any(|slice| slice.stream == *stream_id && slice.offset == *offset)
            });
            if !carried {
                continue;
            }
            let stream = self.stream_mut(*stream_id)?;
            let size = stream.domain.as_discrete()?.size();
            let table = model.add_table(FactorTable::dense(vec![size], vec![1.; size])?);
            let (factor, added) = model.add_table_factor(root, None, table, &stream.variables[..1])?;
            change.merge(added);
            stream.blast = Some(BlastFactor { factor, table });
        }

        info!(
            "Added repeated graph {} with {} copies over {} streams",
            id.index(),
            buffer_size,
            used.len()
        );
        self.repeated.push(RepeatedGraph {
            template: template.clone(),
            copies,
        });
        Ok((id, change))
    }

    // Edge, variable, and fresh-variable moves that slide every repeated graph by one copy
    fn shift(&self, model: &GraphModel) -> Result<StreamShift> {
        let mut shift = StreamShift::default();
        for stream in &self.streams {
            if stream.owner.is_none() {
                continue;
            }
            for pair in stream.variables.windows(2) {
                shift.variables.push((pair[1], pair[0]));
            }
            if let Some(last) = stream.variables.last() {
                shift.fresh.push(*last);
            }
        }
        for repeated in &self.repeated {
            let template = &repeated.template;
            let template_root = template.root();
            let boundary = template.boundary_variables(template_root)?;
            let internal = template
                .variables_flat(template_root)
                .iter()
                .filter(|variable| !boundary.contains(*variable))
                .copied()
                .collect::<Vec<_>>();
            let variable_in = |map: &NodeMap, variable: VariableId| {
                map.node(variable.node())
                    .map(VariableId)
                    .ok_or(FactorGraphError::UnknownNode {
                        kind: "variable",
                        index: variable.index(),
                    })
            };
            let factor_in = |map: &NodeMap, factor: FactorId| {
                map.node(factor.node())
                    .map(FactorId)
                    .ok_or(FactorGraphError::UnknownNode {
                        kind: "factor",
                        index: factor.index(),
                    })
            };
            for pair in repeated.copies.windows(2) {
                let (older, newer) = (&pair[0].1, &pair[1].1);
                for factor in template.factors_flat(template_root).iter() {
                    for variable in template.factor(*factor)?.siblings() {
                        let old = model.edge(variable_in(newer, *variable)?, factor_in(newer, *factor)?)?;
                        let new = model.edge(variable_in(older, *variable)?, factor_in(older, *factor)?)?;
                        shift.edges.push((old, new));
                    }
                }
                for variable in &internal {
                    shift
                        .variables
                        .push((variable_in(newer, *variable)?, variable_in(older, *variable)?));
                }
            }
            if let Some((_, newest)) = repeated.copies.last() {
                for variable in &internal {
                    shift.fresh.push(variable_in(newest, *variable)?);
                }
            }
        }
        Ok(shift)
    }

    // Factors of the oldest copy that touch `variable`
    fn oldest_copy_factors(
        model: &GraphModel,
        repeated: &RepeatedGraph,
        variable: VariableId,
    ) -> Result<Vec<FactorId>> {
        let (oldest, _) = repeated.copies.first().ok_or(FactorGraphError::InvalidArgument(
            "repeated graph has no copies".to_string(),
        ))?;
        let mut factors = Vec::new();
        for factor in model.variable(variable)?.siblings() {
            if model.is_ancestor_of(*oldest, model.factor(*factor)?.owner())? {
                factors.push(*factor);
            }
        }
        Ok(factors)
    }

    // Slides every repeated graph one step along its streams
    pub(crate) fn advance(&mut self, model: &mut GraphModel, solver: &mut Solver) -> Result<()> {
        if self.repeated.is_empty() {
            return Err(FactorGraphError::InvalidArgument(
                "there is no repeated graph to advance".to_string(),
            ));
        }

        for stream in self.streams.iter_mut().filter(|stream| stream.owner.is_some()) {
            if let (Some(sink), Some(first)) = (stream.sink.as_mut(), stream.variables.first()) {
                sink.push(solver.belief(model, *first)?);
            }
        }

        // Summaries of the oldest copies, taken before any state moves
        let mut blasts = Vec::new();
        for stream in &self.streams {
            let (blast, owner) = match (stream.blast, stream.owner) {
                (Some(blast), Some(owner)) => (blast, owner),
                _ => continue,
            };
            let successor = stream.variables[1];
            let factors = Streams::oldest_copy_factors(model, self.repeated(owner)?, successor)?;
            let weights = solver.blast_weights(model, successor, &factors)?;
            let total = weights.iter().sum::<f64>();
            if !(total > 0. && total.is_finite()) {
                return Err(FactorGraphError::ZeroNormalization {
                    node: blast.factor.index(),
                    port: 0,
                });
            }
            let weights = weights.iter().map(|weight| weight / total).collect::<Vec<_>>();
            blasts.push((blast, FactorTable::dense(vec![weights.len()], weights)?));
        }
        let shift = self.shift(model)?;

        for (blast, table) in &blasts {
            *model.table_mut(blast.table)? = table.clone();
        }
        for stream in self.streams.iter_mut().filter(|stream| stream.owner.is_some()) {
            for pair in stream.variables.windows(2) {
                let (to, from) = (pair[0], pair[1]);
                match model.variable(from)?.fixed_value_index() {
                    Some(index) => model.set_variable_fixed_index(to, index)?,
                    None => {
                        let input = model.variable(from)?.input().to_vec();
                        model.set_variable_input(to, &input)?;
                    }
                }
            }
            if let Some(last) = stream.variables.last() {
                let size = stream.domain.as_discrete()?.size();
                let input = stream
                    .source
                    .as_mut()
                    .and_then(VecDeque::pop_front)
                    .unwrap_or_else(|| vec![1.; size]);
                model.set_variable_input(*last, &input)?;
            }
        }

        solver.advance(model, &shift)?;
        for (blast, _) in &blasts {
            solver.reset_factor_messages(model, blast.factor)?;
        }
        self.num_advances += 1;
        debug!(
            "Advance {}: moved {} edges and {} variables, {} variables entered",
            self.num_advances,
            shift.edges.len(),
            shift.variables.len(),
            shift.fresh.len()
        );
        Ok(())
    }
}
