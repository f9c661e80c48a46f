//! Running an on-chain test suite and decoding its results from events.
//!
//! The test-runner contract reports through two events: one per test with
//! its name and outcome, and free-text log lines. Both are decoded with the
//! contract's ABI; anything else in the receipt is ignored.

use crate::chain::Chain;
use crate::reports;
use alloy_dyn_abi::{DynSolValue, EventExt, FunctionExt};
use alloy_json_abi::{Event, Function, JsonAbi};
use alloy_primitives::{Address, Bytes, Log};
use chrono::{DateTime, Utc};
use eyre::{bail, eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const TEST_REPORT_FILE: &str = "solidity-test-results.json";

/// Names of the test-runner entry points and events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SuiteSchema {
    /// Contract to deploy when no address is given.
    pub contract: String,
    /// Non-payable function without arguments that runs every test.
    pub entry_point: String,
    /// `event <name>(string testName, bool passed)`.
    pub result_event: String,
    /// `event <name>(string message)`.
    pub log_event: String,
    /// Optional view function with summary statistics; empty disables it.
    pub statistics: Option<String>,
}

impl Default for SuiteSchema {
    fn default() -> Self {
        Self {
            contract: "TesteSistemaNotas".into(),
            entry_point: "executarTodosTestes".into(),
            result_event: "TesteExecutado".into(),
            log_event: "LogTeste".into(),
            statistics: Some("mostrarEstatisticas".into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcomeEvent {
    Result { test_name: String, passed: bool },
    Log { message: String },
}

/// Matches raw logs against the two suite events.
pub struct EventDecoder<'a> {
    result: Option<&'a Event>,
    log: Option<&'a Event>,
}

impl<'a> EventDecoder<'a> {
    pub fn new(abi: &'a JsonAbi, schema: &SuiteSchema) -> Self {
        let find = |name: &str| abi.event(name).and_then(|overloads| overloads.first());
        Self {
            result: find(&schema.result_event),
            log: find(&schema.log_event),
        }
    }

    /// `None` for any log that is not a well-formed suite event.
    pub fn decode(&self, log: &Log) -> Option<TestOutcomeEvent> {
        let topic0 = *log.topics().first()?;

        if let Some(event) = self.result.filter(|e| e.selector() == topic0) {
            return match decode_values(event, log)?.as_slice() {
                [DynSolValue::String(name), DynSolValue::Bool(passed)] => {
                    Some(TestOutcomeEvent::Result {
                        test_name: name.clone(),
                        passed: *passed,
                    })
                }
                _ => None,
            };
        }

        if let Some(event) = self.log.filter(|e| e.selector() == topic0) {
            return match decode_values(event, log)?.as_slice() {
                [DynSolValue::String(message)] => Some(TestOutcomeEvent::Log {
                    message: message.clone(),
                }),
                _ => None,
            };
        }

        None
    }
}

/// Event arguments in declaration order, indexed or not.
fn decode_values(event: &Event, log: &Log) -> Option<Vec<DynSolValue>> {
    let decoded = event.decode_log(&log.data).ok()?;
    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    event
        .inputs
        .iter()
        .map(|input| if input.indexed { indexed.next() } else { body.next() })
        .collect()
}

/// Pass/fail counts and log lines gathered from one receipt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    /// `(test name, passed)` in decode order.
    pub results: Vec<(String, bool)>,
    /// Log messages in decode order.
    pub messages: Vec<String>,
}

impl Tally {
    pub fn from_events(events: impl IntoIterator<Item = TestOutcomeEvent>) -> Self {
        let mut tally = Self::default();
        for event in events {
            tally.record(event);
        }
        tally
    }

    pub fn record(&mut self, event: TestOutcomeEvent) {
        match event {
            TestOutcomeEvent::Result { test_name, passed } => {
                self.results.push((test_name, passed))
            }
            TestOutcomeEvent::Log { message } => self.messages.push(message),
        }
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|(_, passed)| *passed).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestLogEntry {
    pub id: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    #[serde(rename = "timestamp", with = "reports::timestamp")]
    pub generated_at: DateTime<Utc>,
    #[serde(serialize_with = "reports::checksum::address")]
    pub contract_address: Address,
    pub summary: TestSummary,
    /// Log messages only, numbered from 1.
    pub tests: Vec<TestLogEntry>,
}

impl TestReport {
    pub fn new(contract_address: Address, tally: &Tally, generated_at: DateTime<Utc>) -> Self {
        let passed = tally.passed();
        let failed = tally.failed();
        Self {
            generated_at,
            contract_address,
            summary: TestSummary {
                total: passed + failed,
                passed,
                failed,
            },
            tests: tally
                .messages
                .iter()
                .enumerate()
                .map(|(i, message)| TestLogEntry {
                    id: i + 1,
                    message: message.clone(),
                })
                .collect(),
        }
    }
}

/// A finished suite run.
#[derive(Debug)]
pub struct SuiteRun {
    pub tally: Tally,
    pub report: TestReport,
    pub report_path: PathBuf,
    /// Rendered statistics outputs, when the call succeeded.
    pub statistics: Option<Vec<String>>,
}

impl SuiteRun {
    pub fn all_passed(&self) -> bool {
        self.report.summary.failed == 0
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== TEST RESULTS ===");
        for (name, passed) in &self.tally.results {
            let _ = writeln!(out, "{}: {name}", if *passed { "PASSED" } else { "FAILED" });
        }

        let _ = writeln!(out, "\n=== DETAILED LOGS ===");
        for entry in &self.report.tests {
            let _ = writeln!(out, "{}. {}", entry.id, entry.message);
        }

        let summary = &self.report.summary;
        let _ = writeln!(out, "\n=== SUMMARY ===");
        let _ = writeln!(out, "Total tests: {}", summary.total);
        let _ = writeln!(out, "Passed: {}", summary.passed);
        let _ = writeln!(out, "Failed: {}", summary.failed);
        if self.all_passed() {
            let _ = writeln!(out, "\nAll tests passed.");
        } else {
            let _ = writeln!(out, "\n{} test(s) failed, see the logs above.", summary.failed);
        }

        if let Some(statistics) = &self.statistics {
            let _ = writeln!(out, "\n=== STATISTICS ===");
            for line in statistics {
                let _ = writeln!(out, "{line}");
            }
        }
        out
    }
}

/// A deployed test-runner contract.
pub struct Suite<'a> {
    pub address: Address,
    pub abi: &'a JsonAbi,
    pub schema: &'a SuiteSchema,
}

impl Suite<'_> {
    /// Execute every test, decode the receipt and write the report.
    ///
    /// Only a failed test transaction is an error; unknown events and a
    /// failing statistics call are logged and skipped.
    pub async fn run<C: Chain + ?Sized>(
        &self,
        chain: &mut C,
        reports_dir: &Path,
    ) -> Result<SuiteRun> {
        let entry_point = function(self.abi, &self.schema.entry_point)?;
        if !entry_point.inputs.is_empty() {
            bail!("`{}` takes arguments, expected none", entry_point.name);
        }

        info!(contract = %self.address, "running test suite");
        let receipt = chain
            .send(self.address, Bytes::copy_from_slice(entry_point.selector().as_slice()))
            .await
            .wrap_err("test execution transaction failed")?;

        let decoder = EventDecoder::new(self.abi, self.schema);
        let mut tally = Tally::default();
        for (index, log) in receipt.logs.iter().enumerate() {
            match decoder.decode(log) {
                Some(event) => tally.record(event),
                None => debug!(index, address = %log.address, "ignoring unrelated log"),
            }
        }

        let statistics = match &self.schema.statistics {
            Some(name) if !name.is_empty() => match self.statistics(chain, name).await {
                Ok(lines) => Some(lines),
                Err(e) => {
                    warn!("could not fetch suite statistics: {e:#}");
                    None
                }
            },
            _ => None,
        };

        let report = TestReport::new(self.address, &tally, Utc::now());
        let report_path = reports_dir.join(TEST_REPORT_FILE);
        reports::write_json(&report_path, &report)?;
        info!(
            path = %report_path.display(),
            passed = report.summary.passed,
            failed = report.summary.failed,
            "test report saved"
        );

        Ok(SuiteRun {
            tally,
            report,
            report_path,
            statistics,
        })
    }

    async fn statistics<C: Chain + ?Sized>(
        &self,
        chain: &mut C,
        name: &str,
    ) -> Result<Vec<String>> {
        let function = function(self.abi, name)?;
        let output = chain
            .call(self.address, Bytes::copy_from_slice(function.selector().as_slice()))
            .await?;
        let values = function
            .abi_decode_output(&output)
            .wrap_err_with(|| format!("cannot decode `{name}` output"))?;

        Ok(function
            .outputs
            .iter()
            .zip(&values)
            .enumerate()
            .map(|(i, (param, value))| {
                let label = if param.name.is_empty() {
                    format!("[{i}]")
                } else {
                    param.name.clone()
                };
                format!("{label}: {}", render_value(value))
            })
            .collect())
    }
}

fn function<'a>(abi: &'a JsonAbi, name: &str) -> Result<&'a Function> {
    abi.function(name)
        .and_then(|overloads| overloads.first())
        .ok_or_else(|| eyre!("test-runner ABI has no function `{name}`"))
}

fn render_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Uint(n, _) => n.to_string(),
        DynSolValue::Int(n, _) => n.to_string(),
        DynSolValue::Address(a) => a.to_checksum(None),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::local::tests::{REVERTING_RUNTIME, emitting_runtime, init_code};
    use crate::chain::LocalChain;
    use alloy_primitives::{I256, LogData, B256, U256};
    use pretty_assertions::assert_eq;

    fn abi() -> JsonAbi {
        JsonAbi::parse([
            "event TesteExecutado(string nome, bool resultado)",
            "event LogTeste(string mensagem)",
            "event Transfer(address indexed from, address indexed to, uint256 value)",
            "function executarTodosTestes()",
            "function mostrarEstatisticas() view returns (uint256 proximoId, string info)",
        ])
        .unwrap()
    }

    fn event_log(abi: &JsonAbi, name: &str, body: Vec<DynSolValue>) -> Log {
        let event = &abi.event(name).unwrap()[0];
        let data = DynSolValue::Tuple(body).abi_encode_params();
        Log {
            address: Address::with_last_byte(9),
            data: LogData::new_unchecked(vec![event.selector()], data.into()),
        }
    }

    fn result(abi: &JsonAbi, name: &str, passed: bool) -> Log {
        event_log(
            abi,
            "TesteExecutado",
            vec![DynSolValue::String(name.into()), DynSolValue::Bool(passed)],
        )
    }

    fn message(abi: &JsonAbi, text: &str) -> Log {
        event_log(abi, "LogTeste", vec![DynSolValue::String(text.into())])
    }

    fn transfer(abi: &JsonAbi) -> Log {
        Log {
            address: Address::with_last_byte(1),
            data: LogData::new_unchecked(
                vec![
                    abi.event("Transfer").unwrap()[0].selector(),
                    B256::ZERO,
                    B256::ZERO,
                ],
                DynSolValue::Uint(U256::from(5), 256).abi_encode().into(),
            ),
        }
    }

    async fn deploy(chain: &mut LocalChain, runtime: &[u8]) -> Address {
        chain
            .deploy(init_code(runtime))
            .await
            .unwrap()
            .contract_address
            .unwrap()
    }

    fn without_statistics() -> SuiteSchema {
        SuiteSchema {
            statistics: None,
            ..SuiteSchema::default()
        }
    }

    #[test]
    fn decodes_both_suite_events() {
        let abi = abi();
        let schema = SuiteSchema::default();
        let decoder = EventDecoder::new(&abi, &schema);

        assert_eq!(
            decoder.decode(&result(&abi, "grades are stored", true)),
            Some(TestOutcomeEvent::Result {
                test_name: "grades are stored".into(),
                passed: true
            })
        );
        assert_eq!(
            decoder.decode(&message(&abi, "setup done")),
            Some(TestOutcomeEvent::Log {
                message: "setup done".into()
            })
        );
    }

    #[test]
    fn foreign_and_malformed_logs_are_ignored() {
        let abi = abi();
        let schema = SuiteSchema::default();
        let decoder = EventDecoder::new(&abi, &schema);

        let transfer = transfer(&abi);
        let anonymous = Log {
            address: Address::ZERO,
            data: LogData::new_unchecked(vec![], Bytes::new()),
        };
        let truncated = Log {
            address: Address::ZERO,
            data: LogData::new_unchecked(
                vec![abi.event("LogTeste").unwrap()[0].selector()],
                Bytes::from_static(&[0x01, 0x02]),
            ),
        };

        assert_eq!(decoder.decode(&transfer), None);
        assert_eq!(decoder.decode(&anonymous), None);
        assert_eq!(decoder.decode(&truncated), None);
    }

    #[test]
    fn report_counts_results_and_numbers_logs_separately() {
        let tally = Tally::from_events([
            TestOutcomeEvent::Log {
                message: "start".into(),
            },
            TestOutcomeEvent::Result {
                test_name: "a".into(),
                passed: true,
            },
            TestOutcomeEvent::Result {
                test_name: "b".into(),
                passed: false,
            },
            TestOutcomeEvent::Result {
                test_name: "c".into(),
                passed: true,
            },
            TestOutcomeEvent::Log {
                message: "end".into(),
            },
        ]);

        let report = TestReport::new(Address::ZERO, &tally, Utc::now());

        assert_eq!(
            report.summary,
            TestSummary {
                total: 3,
                passed: 2,
                failed: 1
            }
        );
        assert_eq!(
            report.tests,
            vec![
                TestLogEntry {
                    id: 1,
                    message: "start".into()
                },
                TestLogEntry {
                    id: 2,
                    message: "end".into()
                },
            ]
        );
    }

    #[test]
    fn summary_total_is_passed_plus_failed() {
        let outcomes = [true, false, false, true, true, false, true];
        for n in 0..=outcomes.len() {
            let tally = Tally::from_events(outcomes[..n].iter().enumerate().map(|(i, passed)| {
                TestOutcomeEvent::Result {
                    test_name: format!("t{i}"),
                    passed: *passed,
                }
            }));
            let summary = TestReport::new(Address::ZERO, &tally, Utc::now()).summary;
            assert_eq!(summary.total, summary.passed + summary.failed);
            assert_eq!(summary.total, n);
        }
    }

    #[test]
    fn report_output_format() {
        let tally = Tally::from_events([TestOutcomeEvent::Log {
            message: "hello".into(),
        }]);
        let report = TestReport::new(Address::with_last_byte(7), &tally, Utc::now());

        let json = serde_json::to_value(&report).unwrap();
        let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, ["contractAddress", "summary", "tests", "timestamp"]);
        assert_eq!(json["tests"], serde_json::json!([{ "id": 1, "message": "hello" }]));
        assert_eq!(
            json["summary"],
            serde_json::json!({ "total": 0, "passed": 0, "failed": 0 })
        );
    }

    #[test]
    fn render_shows_each_result() {
        let tally = Tally::from_events([
            TestOutcomeEvent::Result {
                test_name: "stores grade".into(),
                passed: true,
            },
            TestOutcomeEvent::Result {
                test_name: "rejects stranger".into(),
                passed: false,
            },
        ]);
        let run = SuiteRun {
            report: TestReport::new(Address::ZERO, &tally, Utc::now()),
            tally,
            report_path: PathBuf::from("x.json"),
            statistics: Some(vec!["proximoId: 3".into()]),
        };

        let text = run.render();
        assert!(text.contains("PASSED: stores grade"));
        assert!(text.contains("FAILED: rejects stranger"));
        assert!(text.contains("1 test(s) failed"));
        assert!(text.contains("proximoId: 3"));
        assert!(!run.all_passed());
    }

    #[tokio::test]
    async fn run_skips_foreign_logs_in_the_receipt() {
        let abi = abi();
        let schema = without_statistics();
        let mut chain = LocalChain::new();
        let runtime = emitting_runtime(
            &[
                transfer(&abi),
                result(&abi, "stores grade", true),
                transfer(&abi),
                message(&abi, "checked owner"),
                result(&abi, "rejects stranger", false),
            ],
            &[],
        );
        let address = deploy(&mut chain, &runtime).await;
        let dir = tempfile::tempdir().unwrap();

        let run = Suite {
            address,
            abi: &abi,
            schema: &schema,
        }
        .run(&mut chain, dir.path())
        .await
        .unwrap();

        assert_eq!(
            run.tally.results,
            vec![
                ("stores grade".to_string(), true),
                ("rejects stranger".to_string(), false),
            ]
        );
        assert_eq!(run.tally.messages, ["checked owner"]);
        assert_eq!(
            run.report.summary,
            TestSummary {
                total: 2,
                passed: 1,
                failed: 1
            }
        );
        let written: TestReport = reports::read_json(&run.report_path).unwrap();
        assert_eq!(written, run.report);
    }

    #[tokio::test]
    async fn failing_statistics_call_is_not_fatal() {
        let abi = abi();
        let schema = SuiteSchema::default();
        let mut chain = LocalChain::new();
        // returns nothing, so the statistics output cannot be decoded
        let runtime = emitting_runtime(&[result(&abi, "stores grade", true)], &[]);
        let address = deploy(&mut chain, &runtime).await;
        let dir = tempfile::tempdir().unwrap();

        let run = Suite {
            address,
            abi: &abi,
            schema: &schema,
        }
        .run(&mut chain, dir.path())
        .await
        .unwrap();

        assert_eq!(run.statistics, None);
        assert_eq!(run.report.summary.passed, 1);
        assert!(dir.path().join(TEST_REPORT_FILE).exists());
        assert!(!run.render().contains("=== STATISTICS ==="));
    }

    #[tokio::test]
    async fn statistics_outputs_are_rendered() {
        let abi = abi();
        let schema = SuiteSchema::default();
        let mut chain = LocalChain::new();
        let output = DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(3), 256),
            DynSolValue::String("grades".into()),
        ])
        .abi_encode_params();
        let runtime = emitting_runtime(&[message(&abi, "ready")], &output);
        let address = deploy(&mut chain, &runtime).await;
        let dir = tempfile::tempdir().unwrap();

        let run = Suite {
            address,
            abi: &abi,
            schema: &schema,
        }
        .run(&mut chain, dir.path())
        .await
        .unwrap();

        assert_eq!(
            run.statistics,
            Some(vec!["proximoId: 3".to_string(), "info: grades".to_string()])
        );
        let text = run.render();
        assert!(text.contains("=== STATISTICS ===\nproximoId: 3\ninfo: grades"));
    }

    #[tokio::test]
    async fn reverted_suite_transaction_fails_without_a_report() {
        let abi = abi();
        let schema = without_statistics();
        let mut chain = LocalChain::new();
        let address = deploy(&mut chain, &REVERTING_RUNTIME).await;
        let dir = tempfile::tempdir().unwrap();

        let err = Suite {
            address,
            abi: &abi,
            schema: &schema,
        }
        .run(&mut chain, dir.path())
        .await
        .unwrap_err();

        assert!(err.to_string().contains("test execution transaction failed"));
        assert!(!dir.path().join(TEST_REPORT_FILE).exists());
    }

    #[test]
    fn statistics_values_render_plainly() {
        let owner: Address = "0x5fbdb2315678afecb367f032d93f642f64180aa3".parse().unwrap();
        assert_eq!(
            render_value(&DynSolValue::Address(owner)),
            "0x5FbDB2315678afecb367f032d93F642f64180aa3"
        );
        assert_eq!(render_value(&DynSolValue::Bool(false)), "false");
        assert_eq!(render_value(&DynSolValue::Uint(U256::from(42), 256)), "42");
        assert_eq!(
            render_value(&DynSolValue::Int(I256::from_dec_str("-7").unwrap(), 256)),
            "-7"
        );
        assert_eq!(render_value(&DynSolValue::String("ok".into())), "ok");
    }
}
