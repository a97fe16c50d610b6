use crate::models::State;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
struct Bucket {
    count: usize,
    state: State,
    details: Vec<(State, String, String)>,
}

/// Per-run accumulation of results grouped under synthetic summary services.
#[derive(Debug, Clone, Default)]
pub struct AggregateBuckets {
    multiline: bool,
    buckets: BTreeMap<String, Bucket>,
}

impl AggregateBuckets {
    pub fn new(output_format: &str) -> Self {
        Self {
            multiline: output_format == "multiline",
            buckets: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn store(&mut self, detail: &str, aggregation: &str, state: State, output: &str) {
        let bucket = self
            .buckets
            .entry(aggregation.to_string())
            .or_insert_with(|| Bucket {
                count: 0,
                state: State::Ok,
                details: Vec::new(),
            });
        bucket.count += 1;
        bucket.state = bucket.state.worst(state);
        if state != State::Ok || self.multiline {
            bucket
                .details
                .push((state, detail.to_string(), output.to_string()));
        }
    }

    /// One `(service, state, text)` per aggregation, sorted by service name.
    /// Empties the buckets.
    pub fn flush(&mut self) -> Vec<(String, State, String)> {
        let buckets = std::mem::take(&mut self.buckets);
        buckets
            .into_iter()
            .map(|(service, bucket)| {
                let text = if self.multiline {
                    Self::multiline_text(&bucket)
                } else if bucket.state == State::Ok {
                    format!("OK - {} services OK", bucket.count)
                } else {
                    bucket
                        .details
                        .iter()
                        .map(|(_, item, output)| format!("{} {}", item, output))
                        .collect::<Vec<_>>()
                        .join(" *** ")
                };
                (service, bucket.state, text)
            })
            .collect()
    }

    fn multiline_text(bucket: &Bucket) -> String {
        let mut counts = [0usize; 4];
        let mut long_output = String::new();
        for (state, item, output) in &bucket.details {
            long_output.push_str(&format!("\\n{}: {}", item, output));
            counts[state.code() as usize] += 1;
        }
        let summary: Vec<String> = counts
            .iter()
            .zip(["OK", "WARN", "CRIT", "UNKNOWN"])
            .filter(|(count, _)| **count > 0)
            .map(|(count, name)| {
                format!("{} service{} {}", count, if *count != 1 { "s" } else { "" }, name)
            })
            .collect();
        summary.join(", ") + &long_output
    }
}
