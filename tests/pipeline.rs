//! Size audit, deployment and suite run against the in-memory chain.

use alloy_dyn_abi::DynSolValue;
use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, B256};
use pretty_assertions::assert_eq;
use release_runner::artifacts::ArtifactStore;
use release_runner::chain::{Chain, LocalChain};
use release_runner::deploy::{DeployTarget, Orchestrator};
use release_runner::recorder::DeploymentRecorder;
use release_runner::reports;
use release_runner::sizes::{self, Audit, SizeStatus};
use release_runner::testrun::{Suite, SuiteSchema, TestReport, TestSummary};
use serde_json::json;
use std::fs;
use std::path::Path;

const RUNNER_ABI: [&str; 3] = [
    "event TesteExecutado(string nome, bool resultado)",
    "event LogTeste(string mensagem)",
    "function executarTodosTestes()",
];

/// Init code for a contract that emits `logs` on every call.
fn emitting_contract(logs: &[(B256, Vec<u8>)]) -> Vec<u8> {
    let mut runtime = Vec::new();
    for (topic, data) in logs {
        for (i, word) in data.chunks(32).enumerate() {
            let mut padded = [0u8; 32];
            padded[..word.len()].copy_from_slice(word);
            // PUSH32 word, PUSH2 offset, MSTORE
            runtime.push(0x7f);
            runtime.extend_from_slice(&padded);
            runtime.push(0x61);
            runtime.extend_from_slice(&((i * 32) as u16).to_be_bytes());
            runtime.push(0x52);
        }
        // PUSH32 topic, PUSH2 size, PUSH1 0, LOG1
        runtime.push(0x7f);
        runtime.extend_from_slice(topic.as_slice());
        runtime.push(0x61);
        runtime.extend_from_slice(&(data.len() as u16).to_be_bytes());
        runtime.extend_from_slice(&[0x60, 0x00, 0xa1]);
    }
    runtime.push(0x00);

    // Copy the runtime to memory and return it.
    let len = (runtime.len() as u16).to_be_bytes();
    let mut init = vec![
        0x61, len[0], len[1], 0x80, 0x61, 0x00, 0x0d, 0x60, 0x00, 0x39, 0x60, 0x00, 0xf3,
    ];
    init.extend_from_slice(&runtime);
    init
}

fn write_artifact(root: &Path, name: &str, abi: &JsonAbi, code: &[u8]) {
    let dir = root.join(format!("{name}.sol"));
    fs::create_dir_all(&dir).unwrap();
    let artifact = json!({
        "contractName": name,
        "sourceName": format!("contracts/{name}.sol"),
        "abi": abi,
        "bytecode": format!("0x{}", hex::encode(code)),
    });
    fs::write(dir.join(format!("{name}.json")), artifact.to_string()).unwrap();
}

fn runner_code(abi: &JsonAbi) -> Vec<u8> {
    let result = &abi.event("TesteExecutado").unwrap()[0];
    let log = &abi.event("LogTeste").unwrap()[0];
    let outcome = |name: &str, passed: bool| {
        DynSolValue::Tuple(vec![DynSolValue::String(name.into()), DynSolValue::Bool(passed)])
            .abi_encode_params()
    };
    let message = |text: &str| {
        DynSolValue::Tuple(vec![DynSolValue::String(text.into())]).abi_encode_params()
    };

    emitting_contract(&[
        (log.selector(), message("starting")),
        (result.selector(), outcome("registers student", true)),
        (result.selector(), outcome("rejects duplicate", false)),
        (log.selector(), message("done")),
    ])
}

#[tokio::test]
async fn audit_deploy_and_run_suite() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = dir.path().join("artifacts/contracts");
    let reports_dir = dir.path().join("test-results");

    let runner_abi = JsonAbi::parse(RUNNER_ABI).unwrap();
    write_artifact(&artifacts, "SistemaNotas", &JsonAbi::new(), &emitting_contract(&[]));
    write_artifact(&artifacts, "TesteSistemaNotas", &runner_abi, &runner_code(&runner_abi));

    let Audit::Written { report, .. } = sizes::audit(&artifacts, &reports_dir).unwrap() else {
        panic!("artifacts were written");
    };
    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.entries[0].name, "TesteSistemaNotas");
    assert!(report.entries.iter().all(|e| report.status_of(e) == SizeStatus::Ok));

    let store = ArtifactStore::new(&artifacts);
    let recorder = DeploymentRecorder::new(dir.path().join("deployments"));
    let mut chain = LocalChain::new();
    let names = vec!["SistemaNotas".to_string(), "TesteSistemaNotas".to_string()];
    let deployment = Orchestrator::new(&store, &recorder)
        .run(
            &mut chain,
            &DeployTarget {
                network: "hardhat",
                local: true,
            },
            &names,
        )
        .await
        .unwrap();

    let runner = deployment.address_of("TesteSistemaNotas").unwrap();
    assert_eq!(
        recorder.latest("hardhat").unwrap().unwrap().contracts["TesteSistemaNotas"],
        runner
    );

    let schema = SuiteSchema {
        statistics: None,
        ..SuiteSchema::default()
    };
    let suite = Suite {
        address: runner,
        abi: &runner_abi,
        schema: &schema,
    };
    let run = suite.run(&mut chain, &reports_dir).await.unwrap();

    assert_eq!(
        run.tally.results,
        vec![
            ("registers student".to_string(), true),
            ("rejects duplicate".to_string(), false),
        ]
    );
    assert!(!run.all_passed());

    let written: TestReport = reports::read_json(&run.report_path).unwrap();
    assert_eq!(written.contract_address, runner);
    assert_eq!(
        written.summary,
        TestSummary {
            total: 2,
            passed: 1,
            failed: 1
        }
    );
    let messages: Vec<_> = written.tests.iter().map(|t| t.message.as_str()).collect();
    assert_eq!(messages, ["starting", "done"]);
    assert_eq!(chain.block_number().await.unwrap(), 3);
}

#[tokio::test]
async fn suite_against_a_contract_without_events_reports_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let abi = JsonAbi::parse(RUNNER_ABI).unwrap();
    let mut chain = LocalChain::new();
    let address = chain
        .deploy(emitting_contract(&[]).into())
        .await
        .unwrap()
        .contract_address
        .unwrap();
    assert_ne!(address, Address::ZERO);

    let schema = SuiteSchema {
        statistics: None,
        ..SuiteSchema::default()
    };
    let run = Suite {
        address,
        abi: &abi,
        schema: &schema,
    }
    .run(&mut chain, dir.path())
    .await
    .unwrap();

    assert_eq!(run.report.summary.total, 0);
    assert!(run.report.tests.is_empty());
    assert!(run.all_passed());
}
