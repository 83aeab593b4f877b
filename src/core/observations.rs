//! Observation batch construction and commit.
//!
//! All matched statistics of one (image, index) pass travel in a single
//! atomic `$batch` submission with sequential zero-based operation ids.

use chrono::{DateTime, Utc};

use crate::core::matching::MatchedStatistic;
use crate::entities::{BatchMethod, BatchOperation, EntityRef, Observation, ObservationResult};
use crate::io::sensorthings::SensorThingsClient;
use crate::types::FieldResult;

pub struct ObservationBatchBuilder {
    /// Flight/image acquisition timestamp, shared by the whole batch
    pub phenomenon_time: DateTime<Utc>,
    /// Processing timestamp
    pub result_time: DateTime<Utc>,
}

impl ObservationBatchBuilder {
    pub fn new(phenomenon_time: DateTime<Utc>, result_time: DateTime<Utc>) -> Self {
        ObservationBatchBuilder {
            phenomenon_time,
            result_time,
        }
    }

    /// Build one create-operation per matched statistic.
    ///
    /// Statistics without defined values carry nothing worth appending and
    /// are left out; ids stay contiguous over the emitted operations.
    pub fn build(&self, matches: &[MatchedStatistic]) -> FieldResult<Vec<BatchOperation>> {
        let mut operations = Vec::with_capacity(matches.len());
        for matched in matches {
            let statistic = &matched.statistic;
            let result = match (
                statistic.mean,
                statistic.min,
                statistic.max,
                statistic.stddev,
                statistic.median,
            ) {
                (Some(mean), Some(min), Some(max), Some(stddev), Some(median)) => {
                    ObservationResult {
                        mean,
                        min,
                        max,
                        stddev,
                        median,
                    }
                }
                _ => {
                    log::debug!(
                        "Zone {} has undefined statistics, skipping observation",
                        statistic.iot_id
                    );
                    continue;
                }
            };
            let observation = Observation {
                phenomenon_time: self.phenomenon_time,
                result_time: self.result_time,
                result,
                datastream: EntityRef::new(matched.datastream_id),
            };
            operations.push(BatchOperation {
                id: operations.len(),
                method: BatchMethod::Post,
                url: "Observations".to_string(),
                body: serde_json::to_value(&observation)?,
            });
        }
        Ok(operations)
    }
}

/// Commit one observation batch; an empty batch is a no-op, not an error
pub fn commit_observations(
    client: &SensorThingsClient,
    operations: Vec<BatchOperation>,
) -> FieldResult<usize> {
    if operations.is_empty() {
        log::warn!("No valid observations to create");
        return Ok(0);
    }
    let count = operations.len();
    log::info!("Creating {} observations", count);
    client.submit_batch(operations)?;
    log::info!("Successfully created {} observations", count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ZoneStatistic;
    use chrono::TimeZone;

    fn matched(iot_id: i64, datastream_id: i64, defined: bool) -> MatchedStatistic {
        let value = if defined { Some(0.5) } else { None };
        MatchedStatistic {
            statistic: ZoneStatistic {
                iot_id,
                plot_id: Some(format!("P{}", iot_id)),
                trial_id: None,
                mean: value,
                min: value,
                max: value,
                stddev: value,
                median: value,
                count: if defined { 9 } else { 0 },
            },
            datastream_id,
        }
    }

    fn builder() -> ObservationBatchBuilder {
        ObservationBatchBuilder::new(
            Utc.with_ymd_and_hms(2024, 6, 12, 10, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 12, 11, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_batch_ids_are_contiguous_from_zero() {
        let matches: Vec<_> = (1..=5).map(|i| matched(i, i * 10, true)).collect();
        let operations = builder().build(&matches).unwrap();

        assert_eq!(operations.len(), 5);
        for (i, op) in operations.iter().enumerate() {
            assert_eq!(op.id, i);
            assert_eq!(op.url, "Observations");
            assert_eq!(op.body["Datastream"]["@iot.id"], (i as i64 + 1) * 10);
        }
    }

    #[test]
    fn test_empty_match_set_builds_no_operations() {
        let operations = builder().build(&[]).unwrap();
        assert!(operations.is_empty());
    }

    #[test]
    fn test_undefined_statistics_are_skipped_and_ids_stay_contiguous() {
        let matches = vec![
            matched(1, 10, true),
            matched(2, 20, false),
            matched(3, 30, true),
        ];
        let operations = builder().build(&matches).unwrap();

        assert_eq!(operations.len(), 2);
        assert_eq!(operations[0].id, 0);
        assert_eq!(operations[1].id, 1);
        assert_eq!(operations[1].body["Datastream"]["@iot.id"], 30);
    }

    #[test]
    fn test_empty_batch_issues_no_commit_call() {
        // No HTTP request happens for an empty batch, so an unreachable
        // endpoint must not matter.
        let client = SensorThingsClient::new("http://localhost:1").unwrap();
        let created = commit_observations(&client, Vec::new()).unwrap();
        assert_eq!(created, 0);
    }

    #[test]
    fn test_observation_body_carries_all_statistics() {
        let operations = builder().build(&[matched(1, 10, true)]).unwrap();
        let result = &operations[0].body["result"];
        for key in ["mean", "min", "max", "stddev", "median"] {
            assert_eq!(result[key], 0.5);
        }
        assert_eq!(
            operations[0].body["phenomenonTime"],
            "2024-06-12T10:30:00Z"
        );
    }
}
