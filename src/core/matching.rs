//! Matching zone statistics to their metric streams.
//!
//! A statistic matches the one Datastream of its zone whose `raster_data`
//! tag equals the index name case-insensitively. Zero or multiple candidates
//! leave the statistic unmatched; unmatched pairs are collected and reported
//! in one aggregated warning instead of aborting the run.

use crate::types::{ZoneStatistic, ZoneStreams};

/// One statistic matched to its metric stream
#[derive(Debug, Clone)]
pub struct MatchedStatistic {
    pub statistic: ZoneStatistic,
    pub datastream_id: i64,
}

/// One (zone, index) pair without a unique metric stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmatchedStatistic {
    pub iot_id: i64,
    pub index_name: String,
}

#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub matched: Vec<MatchedStatistic>,
    pub unmatched: Vec<UnmatchedStatistic>,
}

pub struct DatastreamMatcher;

impl DatastreamMatcher {
    pub fn match_statistics(
        statistics: &[ZoneStatistic],
        index_name: &str,
        zone_streams: &[ZoneStreams],
    ) -> MatchOutcome {
        let tag = index_name.to_lowercase();
        let mut outcome = MatchOutcome::default();

        for statistic in statistics {
            let candidates: Vec<i64> = zone_streams
                .iter()
                .find(|zone| zone.iot_id == statistic.iot_id)
                .map(|zone| {
                    zone.streams
                        .iter()
                        .filter(|stream| {
                            stream
                                .raster_data
                                .as_deref()
                                .map_or(false, |t| t.to_lowercase() == tag)
                        })
                        .map(|stream| stream.id)
                        .collect()
                })
                .unwrap_or_default();

            match candidates.as_slice() {
                [datastream_id] => outcome.matched.push(MatchedStatistic {
                    statistic: statistic.clone(),
                    datastream_id: *datastream_id,
                }),
                _ => outcome.unmatched.push(UnmatchedStatistic {
                    iot_id: statistic.iot_id,
                    index_name: index_name.to_string(),
                }),
            }
        }

        if !outcome.unmatched.is_empty() {
            log::warn!(
                "No unique datastream tagged '{}' for {} zones: iot_ids {:?}",
                index_name,
                outcome.unmatched.len(),
                outcome
                    .unmatched
                    .iter()
                    .map(|u| u.iot_id)
                    .collect::<Vec<_>>()
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetricStream;

    fn statistic(iot_id: i64) -> ZoneStatistic {
        ZoneStatistic {
            iot_id,
            plot_id: Some(format!("P{}", iot_id)),
            trial_id: Some("T".to_string()),
            mean: Some(0.5),
            min: Some(0.1),
            max: Some(0.9),
            stddev: Some(0.2),
            median: Some(0.5),
            count: 9,
        }
    }

    fn streams(iot_id: i64, tags: &[(i64, &str)]) -> ZoneStreams {
        ZoneStreams {
            iot_id,
            streams: tags
                .iter()
                .map(|(id, tag)| MetricStream {
                    id: *id,
                    raster_data: Some(tag.to_string()),
                })
                .collect(),
        }
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let stats: Vec<_> = (1..=3).map(statistic).collect();
        let zone_streams: Vec<_> = (1..=3).map(|i| streams(i, &[(i * 10, "ndvi")])).collect();

        let outcome = DatastreamMatcher::match_statistics(&stats, "NDVI", &zone_streams);
        assert_eq!(outcome.matched.len(), 3);
        assert_eq!(outcome.unmatched.len(), 0);
        assert_eq!(outcome.matched[0].datastream_id, 10);
        assert_eq!(outcome.matched[2].datastream_id, 30);
    }

    #[test]
    fn test_wrong_tag_is_unmatched_not_an_error() {
        let stats = vec![statistic(1)];
        let zone_streams = vec![streams(1, &[(10, "ndre")])];

        let outcome = DatastreamMatcher::match_statistics(&stats, "ndvi", &zone_streams);
        assert!(outcome.matched.is_empty());
        assert_eq!(
            outcome.unmatched,
            vec![UnmatchedStatistic {
                iot_id: 1,
                index_name: "ndvi".to_string()
            }]
        );
    }

    #[test]
    fn test_multiple_candidates_are_unmatched() {
        let stats = vec![statistic(1)];
        let zone_streams = vec![streams(1, &[(10, "NDVI"), (11, "ndvi")])];

        let outcome = DatastreamMatcher::match_statistics(&stats, "ndvi", &zone_streams);
        assert!(outcome.matched.is_empty());
        assert_eq!(outcome.unmatched.len(), 1);
    }

    #[test]
    fn test_zone_without_streams_is_unmatched() {
        let stats = vec![statistic(1), statistic(2)];
        let zone_streams = vec![streams(1, &[(10, "ndvi")])];

        let outcome = DatastreamMatcher::match_statistics(&stats, "ndvi", &zone_streams);
        assert_eq!(outcome.matched.len(), 1);
        assert_eq!(outcome.unmatched.len(), 1);
        assert_eq!(outcome.unmatched[0].iot_id, 2);
    }
}
