//! Pre/post-flight validation: samples appliance metrics, canonicalizes
//! them, persists artifacts, and compares the two sides of an upgrade
//! against configured margins. A failed comparison is reported, never
//! fatal; operator review is the policy.

use crate::{
    common::{
        error::{DeviceApi as DeviceApiCtx, InsufficientDisk, Result},
        file,
    },
    config::ValidationMargins,
    device_api::{ArpEntry, DeviceApi, DeviceMetrics, RouteEntry},
    workdir::WorkDir,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::{collections::BTreeSet, path::PathBuf};

/// Canonicalized metrics sample, persisted as a pre-flight artifact and
/// embedded in post-flight reports.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub serial: String,
    pub timestamp: String,
    pub tcp_sessions: u64,
    pub route_count: usize,
    pub routes: Vec<RouteEntry>,
    pub arp_count: usize,
    pub arp_entries: Vec<ArpEntry>,
    pub disk_available_gb: f64,
}

impl MetricsRecord {
    /// Stable-sort routes by (destination, gateway, interface) and ARP
    /// entries by (ip, mac) so set comparisons are order-insensitive.
    pub fn canonicalize(serial: &str, mut metrics: DeviceMetrics) -> Self {
        metrics.routes.sort();
        metrics.arp_entries.sort();
        Self {
            serial: serial.to_string(),
            timestamp: artifact_timestamp(),
            tcp_sessions: metrics.tcp_sessions,
            route_count: metrics.routes.len(),
            routes: metrics.routes,
            arp_count: metrics.arp_entries.len(),
            arp_entries: metrics.arp_entries,
            disk_available_gb: metrics.disk_available_gb,
        }
    }

    fn artifact_name(&self) -> String {
        format!("{}_{}.json", self.serial, self.timestamp)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TcpSessionComparison {
    pub pre: u64,
    pub post: u64,
    pub difference: i64,
    pub percentage: f64,
    pub within_margin: bool,
}

/// Set comparison over one canonicalized table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableComparison<T> {
    pub count_difference: i64,
    pub added: Vec<T>,
    pub removed: Vec<T>,
    pub validation_passed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub tcp_sessions: TcpSessionComparison,
    pub routes: TableComparison<RouteEntry>,
    pub arp_entries: TableComparison<ArpEntry>,
    pub validation_passed: bool,
}

/// Post-flight artifact: both samples plus the comparison.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostFlightRecord {
    pub serial: String,
    pub timestamp: String,
    pub pre_flight: MetricsRecord,
    pub post_flight: MetricsRecord,
    pub comparison: ComparisonReport,
}

pub struct Validator {
    pre_dir: PathBuf,
    post_dir: PathBuf,
    margins: ValidationMargins,
}

impl Validator {
    pub fn new(workdir: &WorkDir, margins: ValidationMargins) -> Self {
        Self {
            pre_dir: workdir.validation_pre_flight_dir(),
            post_dir: workdir.validation_post_flight_dir(),
            margins,
        }
    }

    /// Sample metrics, canonicalize, persist the pre-flight artifact.
    pub async fn collect(&self, serial: &str, api: &dyn DeviceApi) -> Result<MetricsRecord> {
        let metrics = api.metrics().await.context(DeviceApiCtx { serial })?;
        let record = MetricsRecord::canonicalize(serial, metrics);
        file::write_json_atomic(&self.pre_dir.join(record.artifact_name()), &record)?;
        Ok(record)
    }

    /// Compare two samples against the configured margins.
    pub fn compare(&self, pre: &MetricsRecord, post: &MetricsRecord) -> ComparisonReport {
        let difference = post.tcp_sessions as i64 - pre.tcp_sessions as i64;
        let percentage = difference as f64 / pre.tcp_sessions.max(1) as f64 * 100.0;
        let tcp_sessions = TcpSessionComparison {
            pre: pre.tcp_sessions,
            post: post.tcp_sessions,
            difference,
            percentage,
            within_margin: percentage.abs() <= self.margins.tcp_session_margin_percent,
        };

        let routes = table_comparison(&pre.routes, &post.routes, self.margins.route_margin);
        let arp_entries =
            table_comparison(&pre.arp_entries, &post.arp_entries, self.margins.arp_margin);

        let validation_passed =
            tcp_sessions.within_margin && routes.validation_passed && arp_entries.validation_passed;
        ComparisonReport {
            tcp_sessions,
            routes,
            arp_entries,
            validation_passed,
        }
    }

    /// Persist the post-flight artifact embedding both samples.
    pub fn persist_post_flight(
        &self,
        pre: &MetricsRecord,
        post: &MetricsRecord,
        comparison: &ComparisonReport,
    ) -> Result<PathBuf> {
        let record = PostFlightRecord {
            serial: post.serial.clone(),
            timestamp: post.timestamp.clone(),
            pre_flight: pre.clone(),
            post_flight: post.clone(),
            comparison: comparison.clone(),
        };
        let path = self.post_dir.join(format!(
            "{}_{}.json",
            record.serial, record.timestamp
        ));
        file::write_json_atomic(&path, &record)?;
        Ok(path)
    }

    /// Free-space gate run before each image download.
    pub async fn disk_precheck(
        &self,
        serial: &str,
        api: &dyn DeviceApi,
        min_gb: f64,
    ) -> Result<f64> {
        let available_gb = api
            .disk_available()
            .await
            .context(DeviceApiCtx { serial })?;
        if available_gb < min_gb {
            return InsufficientDisk {
                serial,
                available_gb,
                required_gb: min_gb,
            }
            .fail();
        }
        Ok(available_gb)
    }
}

fn table_comparison<T>(pre: &[T], post: &[T], margin: usize) -> TableComparison<T>
where
    T: Clone + Ord,
{
    let pre_set: BTreeSet<&T> = pre.iter().collect();
    let post_set: BTreeSet<&T> = post.iter().collect();

    let added: Vec<T> = post_set.difference(&pre_set).map(|&e| e.clone()).collect();
    let removed: Vec<T> = pre_set.difference(&post_set).map(|&e| e.clone()).collect();
    let validation_passed = added.len() <= margin && removed.len() <= margin;

    TableComparison {
        count_difference: post.len() as i64 - pre.len() as i64,
        added,
        removed,
        validation_passed,
    }
}

/// Filename-safe ISO8601 stamp used to key validation artifacts.
fn artifact_timestamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(dest: &str, gw: &str) -> RouteEntry {
        RouteEntry {
            destination: dest.to_string(),
            gateway: gw.to_string(),
            interface: "ethernet1/1".to_string(),
        }
    }

    fn arp(ip: &str, mac: &str) -> ArpEntry {
        ArpEntry {
            ip: ip.to_string(),
            mac: mac.to_string(),
            interface: "ethernet1/1".to_string(),
        }
    }

    fn record(tcp: u64, routes: Vec<RouteEntry>, arps: Vec<ArpEntry>) -> MetricsRecord {
        MetricsRecord::canonicalize(
            "001",
            DeviceMetrics {
                tcp_sessions: tcp,
                routes,
                arp_entries: arps,
                disk_available_gb: 42.0,
            },
        )
    }

    fn validator(margins: ValidationMargins) -> (tempfile::TempDir, Validator) {
        let tmp = tempfile::tempdir().unwrap();
        let workdir = WorkDir::new(tmp.path());
        workdir.ensure_layout().unwrap();
        let validator = Validator::new(&workdir, margins);
        (tmp, validator)
    }

    #[test]
    fn canonicalize_sorts_routes_and_arp() {
        let rec = record(
            10,
            vec![route("10.2.0.0/16", "b"), route("10.1.0.0/16", "a")],
            vec![arp("10.0.0.2", "aa"), arp("10.0.0.1", "bb")],
        );
        assert_eq!(rec.routes[0].destination, "10.1.0.0/16");
        assert_eq!(rec.arp_entries[0].ip, "10.0.0.1");
        assert_eq!(rec.route_count, 2);
        assert_eq!(rec.arp_count, 2);
    }

    #[test]
    fn identical_samples_pass_validation() {
        let (_tmp, v) = validator(ValidationMargins::default());
        let pre = record(100, vec![route("10.1.0.0/16", "a")], vec![arp("1", "m")]);
        let post = record(100, vec![route("10.1.0.0/16", "a")], vec![arp("1", "m")]);

        let report = v.compare(&pre, &post);
        assert!(report.validation_passed);
        assert_eq!(report.tcp_sessions.difference, 0);
        assert!(report.routes.added.is_empty());
    }

    #[test]
    fn session_drift_outside_margin_fails_tcp_check() {
        let (_tmp, v) = validator(ValidationMargins {
            tcp_session_margin_percent: 10.0,
            ..Default::default()
        });
        let pre = record(100, vec![], vec![]);
        let post = record(75, vec![], vec![]);

        let report = v.compare(&pre, &post);
        assert_eq!(report.tcp_sessions.difference, -25);
        assert!((report.tcp_sessions.percentage + 25.0).abs() < f64::EPSILON);
        assert!(!report.tcp_sessions.within_margin);
        assert!(!report.validation_passed);
    }

    #[test]
    fn zero_pre_sessions_does_not_divide_by_zero() {
        let (_tmp, v) = validator(ValidationMargins::default());
        let pre = record(0, vec![], vec![]);
        let post = record(5, vec![], vec![]);

        let report = v.compare(&pre, &post);
        assert!((report.tcp_sessions.percentage - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn route_changes_are_set_differences() {
        let (_tmp, v) = validator(ValidationMargins {
            route_margin: 0,
            ..Default::default()
        });
        let pre = record(
            10,
            vec![route("10.1.0.0/16", "a"), route("10.2.0.0/16", "b")],
            vec![],
        );
        let post = record(
            10,
            vec![route("10.1.0.0/16", "a"), route("10.3.0.0/16", "c")],
            vec![],
        );

        let report = v.compare(&pre, &post);
        assert_eq!(report.routes.added.len(), 1);
        assert_eq!(report.routes.removed.len(), 1);
        assert_eq!(report.routes.added[0].destination, "10.3.0.0/16");
        assert!(!report.routes.validation_passed);
        assert_eq!(report.routes.count_difference, 0);
    }

    #[test]
    fn margin_failure_is_reported_not_fatal() {
        let (_tmp, v) = validator(ValidationMargins {
            arp_margin: 1,
            ..Default::default()
        });
        let pre = record(10, vec![], vec![arp("1", "m"), arp("2", "n")]);
        let post = record(10, vec![], vec![]);

        let report = v.compare(&pre, &post);
        assert!(!report.arp_entries.validation_passed);
        // The report is data; nothing here returns an error.
        assert!(!report.validation_passed);
    }

    #[tokio::test]
    async fn collect_persists_a_pre_flight_artifact() {
        use crate::device_api::mock::{MockDeviceApi, MockState};
        use std::sync::{Arc, Mutex};

        let (tmp, v) = validator(ValidationMargins::default());
        let mut state = MockState::new("001", "10.5.1");
        state.metrics = DeviceMetrics {
            tcp_sessions: 7,
            routes: vec![route("10.1.0.0/16", "a")],
            arp_entries: vec![],
            disk_available_gb: 0.0,
        };
        let api = MockDeviceApi::new(Arc::new(Mutex::new(state)));

        let record = v.collect("001", &api).await.unwrap();
        assert_eq!(record.tcp_sessions, 7);

        let artifacts: Vec<_> = std::fs::read_dir(
            tmp.path().join(constants::VALIDATION_PRE_FLIGHT_DIR),
        )
        .unwrap()
        .flatten()
        .collect();
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0]
            .file_name()
            .to_string_lossy()
            .starts_with("001_"));
    }

    #[tokio::test]
    async fn disk_precheck_fails_below_minimum() {
        use crate::device_api::mock::{MockDeviceApi, MockState};
        use std::sync::{Arc, Mutex};

        let (_tmp, v) = validator(ValidationMargins::default());
        let mut state = MockState::new("001", "10.5.1");
        state.disk_available_gb = 2.0;
        let api = MockDeviceApi::new(Arc::new(Mutex::new(state)));

        let result = v.disk_precheck("001", &api, 5.0).await;
        assert!(result.is_err());
    }
}
