/*!
Tables summarising the runs of a [`SimulationGroup`].

# Examples

```no_run
use std::num::NonZeroUsize;

use blockprop_sim::prelude::*;

let config = SimulationConfig { num_of_nodes: 50, end_block_height: 20, ..Default::default() };
let results = SimulationGroup::new(config, Settings::default())
    .seeds([1, 2])
    .repeat_all(NonZeroUsize::new(4).unwrap())
    .run_all()
    .unwrap()
    .all()
    .average(Average::Median) // Median over the repeated runs of each seed
    .format(Format::CSV)
    .build();

println!("{}", results);
```

[`SimulationGroup`]: crate::simulation::SimulationGroup
*/

use std::{collections::BTreeSet, fmt::Display, num::NonZeroUsize};

use crate::{
    analytics::WINNING_RATES, simulation::SimulationOutput,
    utils::median_of_floats,
};

/// Floating point precision of results data.
pub const FLOAT_PRECISION_DIGITS: usize = 6;

/// Builder for [`ResultsTable`]. Produced by running a
/// [`SimulationGroup`](crate::simulation::SimulationGroup).
#[derive(Debug, Clone)]
pub struct ResultsBuilder {
    average: Average,
    columns: BTreeSet<Column>,
    data: Vec<SimulationOutput>,
    format: Format,
    repeated: NonZeroUsize,
}

/// Describes the appearance of a [`ResultsTable`] table as given by its
/// [`Display`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub enum Format {
    /// Comma-separated, without extra whitespace.
    CSV,
    /// Human-readable.
    #[default]
    PrettyPrint,
}

impl ResultsBuilder {
    pub(crate) fn new(
        data: Vec<SimulationOutput>,
        repeated: NonZeroUsize,
    ) -> Self {
        Self {
            data,
            repeated,
            average: Average::default(),
            columns: BTreeSet::default(),
            format: Format::default(),
        }
    }

    /// Include every column.
    ///
    /// [`ResultsBuilder::average`] must still be called separately
    /// to create averaged data.
    pub fn all(self) -> Self {
        self.blocks_minted()
            .chain_height()
            .orphans()
            .propagation_times()
            .fairness()
            .end_time()
    }

    /// Average the results of repeated runs based on the given [`Average`]
    /// type. For types other than [`Average::None`], a column describing the
    /// averaging method will be included in the results table.
    pub fn average(mut self, average: Average) -> Self {
        self.average = average;

        self
    }

    /// Include the "Blocks Minted" column.
    pub fn blocks_minted(mut self) -> Self {
        self.columns.insert(Column::BlocksMinted);

        self
    }

    /// Include the "Chain Height" column.
    pub fn chain_height(mut self) -> Self {
        self.columns.insert(Column::ChainHeight);

        self
    }

    /// Include the "Average Orphans" column.
    pub fn orphans(mut self) -> Self {
        self.columns.insert(Column::AverageOrphans);

        self
    }

    /// Include one column per propagation time average.
    pub fn propagation_times(mut self) -> Self {
        for kind in [
            Propagation::Percentile50,
            Propagation::Percentile90,
            Propagation::Percentile100,
            Propagation::Mean,
            Propagation::HashrateWeighted,
        ] {
            self.columns.insert(Column::Propagation(kind));
        }

        self
    }

    /// Include a "Fairness Sum" column per winning rate.
    pub fn fairness(mut self) -> Self {
        for i in 0..WINNING_RATES.len() {
            self.columns.insert(Column::FairnessSum(i));
        }

        self
    }

    /// Include the "End Time" column.
    pub fn end_time(mut self) -> Self {
        self.columns.insert(Column::EndTime);

        self
    }

    /// Specify the [`Format`] of the results table.
    pub fn format(mut self, format: Format) -> Self {
        self.format = format;

        self
    }

    /// Extract the raw [`SimulationOutput`] data. Repeated runs of a seed
    /// are grouped together, in seed order.
    pub fn data(self) -> Vec<SimulationOutput> {
        self.data
    }

    /// Create new [`ResultsTable`].
    pub fn build(self) -> ResultsTable {
        let ResultsBuilder { average, mut columns, data, format, repeated } =
            self;

        columns.insert(Column::Seed);
        match average {
            Average::None => {
                columns.insert(Column::Stream);
            }
            _ => {
                columns.insert(Column::AverageOf(average));
            }
        }

        let columns = Vec::from_iter(columns);
        let rows = match average {
            Average::None => data
                .iter()
                .map(|output| {
                    columns.iter().map(|col| col.get_value(output)).collect()
                })
                .collect(),
            _ => data
                .chunks(repeated.get())
                .map(|outputs| {
                    columns
                        .iter()
                        .map(|col| col.get_average_value(average, outputs))
                        .collect()
                })
                .collect(),
        };

        ResultsTable { columns, format, rows }
    }
}

/// Formatted results of a
/// [`SimulationGroup`](crate::simulation::SimulationGroup), given by the
/// [`Display`] implementation according to its [`Format`].
pub struct ResultsTable {
    columns: Vec<Column>,
    format: Format,
    rows: Vec<Vec<ColumnValue>>,
}

impl ResultsTable {
    const SEPARATOR_VERTICAL: char = '|';
    const SEPARATOR_HORIZONTAL: char = '-';

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn set_format(&mut self, format: Format) {
        self.format = format;
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Display for ResultsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let titles: Vec<_> =
            self.columns.iter().map(|col| col.to_string()).collect();

        match self.format {
            Format::CSV => {
                write!(f, "{}", titles.join(","))?;

                for row in self.rows.iter() {
                    writeln!(f)?;

                    let row: Vec<_> =
                        row.iter().map(|val| val.to_string()).collect();
                    write!(f, "{}", row.join(","))?;
                }
            }
            Format::PrettyPrint => {
                let mut widths: Vec<_> =
                    titles.iter().map(|title| title.len()).collect();
                for row in self.rows.iter() {
                    for (i, val) in row.iter().enumerate() {
                        widths[i] = widths[i].max(val.to_string().len());
                    }
                }

                for (i, title) in titles.into_iter().enumerate() {
                    write!(
                        f,
                        " {:1$} {2}",
                        title,
                        widths[i],
                        Self::SEPARATOR_VERTICAL
                    )?;
                }
                writeln!(f)?;

                let total_width: usize = widths.iter().map(|x| x + 3).sum();
                for _ in 0..total_width {
                    write!(f, "{}", Self::SEPARATOR_HORIZONTAL)?;
                }

                for row in self.rows.iter() {
                    writeln!(f)?;

                    for (i, val) in row.iter().enumerate() {
                        write!(
                            f,
                            " {:1$} {2}",
                            val.to_string(),
                            widths[i],
                            Self::SEPARATOR_VERTICAL
                        )?;
                    }
                }
            }
        }

        Ok(())
    }
}

/// Methods of extracting a central value from a set of repeated runs.
///
/// Only columns which vary between runs are averaged.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Average {
    #[default]
    /// Include all repeated values.
    None,
    /// Arithmetic mean of all values.
    Mean,
    /// Median of all values.
    Median,
    /// Maximum of all values.
    Max,
    /// Minimum of all values.
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Propagation {
    Percentile50,
    Percentile90,
    Percentile100,
    Mean,
    HashrateWeighted,
}

/// Type of column that can appear in a results table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Column {
    // Variant order determines the order of columns in results tables.
    Seed,
    Stream,
    AverageOf(Average),
    BlocksMinted,
    ChainHeight,
    AverageOrphans,
    Propagation(Propagation),
    /// Index into [WINNING_RATES].
    FairnessSum(usize),
    EndTime,
}

/// Value which corresponds to a [`Column`].
#[derive(Debug, Clone)]
enum ColumnValue {
    Int(u64),
    Float(f64),
}

impl Column {
    fn get_value(&self, output: &SimulationOutput) -> ColumnValue {
        match self {
            Self::Seed => ColumnValue::Int(output.seed),
            Self::Stream => ColumnValue::Int(output.stream),
            Self::AverageOf(_) => unreachable!(
                "never need the single value of the average descriptor column"
            ),
            _ => ColumnValue::Float(self.float_of(output)),
        }
    }

    fn float_of(&self, output: &SimulationOutput) -> f64 {
        let propagation = &output.results.propagation;

        match self {
            // Genesis is not minted.
            Self::BlocksMinted => output.network.blocks().len().saturating_sub(1) as f64,
            Self::ChainHeight => output.network.blocks().max_height() as f64,
            Self::AverageOrphans => output.average_orphans,
            Self::Propagation(kind) => match kind {
                Propagation::Percentile50 => propagation.average_50,
                Propagation::Percentile90 => propagation.average_90,
                Propagation::Percentile100 => propagation.average_100,
                Propagation::Mean => propagation.average_mean,
                Propagation::HashrateWeighted => {
                    propagation.average_hashrate_weighted
                }
            },
            Self::FairnessSum(i) => output
                .results
                .fairness
                .get(*i)
                .map(|fairness| fairness.sum)
                .unwrap_or_default(),
            Self::EndTime => output.end_time as f64,
            Self::Seed | Self::Stream | Self::AverageOf(_) => unreachable!(),
        }
    }

    fn get_average_value(
        &self,
        method: Average,
        data: &[SimulationOutput],
    ) -> ColumnValue {
        match self {
            Self::AverageOf(_) => return ColumnValue::Int(data.len() as u64),
            Self::Seed | Self::Stream => return self.get_value(&data[0]),
            _ => (),
        }

        let vls: Vec<_> = data.iter().map(|output| self.float_of(output)).collect();
        let avg = match method {
            Average::Mean => vls.iter().sum::<f64>() / vls.len().max(1) as f64,
            Average::Median => median_of_floats(vls),
            Average::Max => vls.into_iter().fold(f64::NEG_INFINITY, f64::max),
            Average::Min => vls.into_iter().fold(f64::INFINITY, f64::min),
            Average::None => unreachable!(),
        };

        ColumnValue::Float(avg)
    }
}

impl Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seed => write!(f, "Seed"),
            Self::Stream => write!(f, "Stream"),
            Self::AverageOf(method) => match method {
                Average::Mean => write!(f, "Mean Of"),
                Average::Median => write!(f, "Median Of"),
                Average::Max => write!(f, "Max Of"),
                Average::Min => write!(f, "Min Of"),
                Average::None => unreachable!(),
            },
            Self::BlocksMinted => write!(f, "Blocks Minted"),
            Self::ChainHeight => write!(f, "Chain Height"),
            Self::AverageOrphans => write!(f, "Average Orphans"),
            Self::Propagation(kind) => match kind {
                Propagation::Percentile50 => write!(f, "50% Propagation"),
                Propagation::Percentile90 => write!(f, "90% Propagation"),
                Propagation::Percentile100 => write!(f, "100% Propagation"),
                Propagation::Mean => write!(f, "Mean Propagation"),
                Propagation::HashrateWeighted => {
                    write!(f, "Hashrate Weighted Propagation")
                }
            },
            Self::FairnessSum(i) => {
                write!(f, "Fairness Sum (win {:?})", WINNING_RATES[*i])
            }
            Self::EndTime => write!(f, "End Time"),
        }
    }
}

impl Display for ColumnValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{}", value),
            Self::Float(value) => {
                write!(f, "{:.1$}", value, FLOAT_PRECISION_DIGITS)
            }
        }
    }
}
