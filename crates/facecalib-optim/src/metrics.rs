/// Receiver of the scalar series and run summaries emitted by the optimizer.
pub trait MetricsSink {
    /// Record one value of the series `tag` at `step`.
    fn record_scalar(&mut self, tag: &str, value: f64, step: usize);

    /// Record the final hyper-parameter to metric summary of a run.
    fn record_summary(&mut self, hparams: &[(&str, f64)], metrics: &[(&str, f64)]);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record_scalar(&mut self, _tag: &str, _value: f64, _step: usize) {}

    fn record_summary(&mut self, _hparams: &[(&str, f64)], _metrics: &[(&str, f64)]) {}
}

/// Sink forwarding to the `log` facade, one line per record.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    run: String,
}

impl LogSink {
    /// Create a sink prefixing every line with `run`.
    pub fn new(run: impl Into<String>) -> Self {
        Self { run: run.into() }
    }
}

impl MetricsSink for LogSink {
    fn record_scalar(&mut self, tag: &str, value: f64, step: usize) {
        log::info!("[{}] step {step:>6} {tag} = {value:.6}", self.run);
    }

    fn record_summary(&mut self, hparams: &[(&str, f64)], metrics: &[(&str, f64)]) {
        let join = |pairs: &[(&str, f64)]| {
            pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(" ")
        };
        log::info!("[{}] hparams: {} | metrics: {}", self.run, join(hparams), join(metrics));
    }
}

/// Sink keeping every record in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    /// Recorded `(tag, value, step)` triples in arrival order.
    pub scalars: Vec<(String, f64, usize)>,
    /// Recorded summaries.
    pub summaries: Vec<(Vec<(String, f64)>, Vec<(String, f64)>)>,
}

impl MemorySink {
    /// Values of the series `tag`, in arrival order.
    pub fn series(&self, tag: &str) -> Vec<f64> {
        self.scalars
            .iter()
            .filter(|(t, _, _)| t == tag)
            .map(|(_, v, _)| *v)
            .collect()
    }
}

impl MetricsSink for MemorySink {
    fn record_scalar(&mut self, tag: &str, value: f64, step: usize) {
        self.scalars.push((tag.to_string(), value, step));
    }

    fn record_summary(&mut self, hparams: &[(&str, f64)], metrics: &[(&str, f64)]) {
        let own = |pairs: &[(&str, f64)]| pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        self.summaries.push((own(hparams), own(metrics)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_series() {
        let mut sink = MemorySink::default();
        sink.record_scalar("loss/train", 1.0, 0);
        sink.record_scalar("error/f_error", 0.5, 0);
        sink.record_scalar("loss/train", 0.8, 1);
        sink.record_summary(&[("lr", 1e-3)], &[("f_error", 0.1)]);
        assert_eq!(sink.series("loss/train"), vec![1.0, 0.8]);
        assert_eq!(sink.summaries.len(), 1);
        assert_eq!(sink.summaries[0].1, vec![("f_error".to_string(), 0.1)]);
    }
}
