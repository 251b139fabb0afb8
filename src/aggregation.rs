mod sink;
mod window;

pub use sink::{CountsSink, LogSink, SourceIdentity, TimeoutSink};
pub use window::{
    AggregatorConfig, FlushOutcome, IntervalTimer, SummaryPolicy, TickReport, Totals,
    WindowedAggregator,
};
