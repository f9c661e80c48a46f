use alloy_primitives::Address;
use clap::{Args, Parser, Subcommand};
use eyre::{bail, eyre, Result, WrapErr};
use release_runner::artifacts::ArtifactStore;
use release_runner::chain::{Chain, LocalChain, RpcChain};
use release_runner::config::{Config, Endpoint, Network};
use release_runner::deploy::{self, DeployTarget, Orchestrator};
use release_runner::recorder::DeploymentRecorder;
use release_runner::sizes::{self, Audit};
use release_runner::testrun::{Suite, SuiteRun};
use release_runner::verify::EtherscanVerifier;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "release-runner",
    about = "Audit contract sizes, deploy the contract set, and run the on-chain test suite."
)]
struct Cli {
    /// Configuration file (defaults to ./release.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rank compiled contracts by size against the 24,576-byte limit
    Sizes,
    /// Deploy the configured contracts in order and record the run
    Deploy {
        #[arg(long, default_value = "hardhat")]
        network: String,
        /// Run the test suite against the freshly deployed test runner
        #[arg(long)]
        run_tests: bool,
        #[command(flatten)]
        keys: Keys,
    },
    /// Execute the on-chain test suite and write the test report
    Test {
        #[arg(long, default_value = "hardhat")]
        network: String,
        /// Use an already deployed test runner instead of deploying one
        #[arg(long, conflicts_with = "use_latest")]
        address: Option<Address>,
        /// Use the test runner from the network's latest deployment
        #[arg(long)]
        use_latest: bool,
        #[command(flatten)]
        keys: Keys,
    },
}

#[derive(Args)]
struct Keys {
    /// Signing key for RPC networks
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,
    /// Explorer API key, enables source verification
    #[arg(long, env = "ETHERSCAN_API_KEY", hide_env_values = true)]
    etherscan_api_key: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Sizes => run_sizes(&config),
        Command::Deploy {
            network,
            run_tests,
            keys,
        } => run_deploy(&config, &network, run_tests, &keys).await,
        Command::Test {
            network,
            address,
            use_latest,
            keys,
        } => run_test(&config, &network, address, use_latest, &keys).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_sizes(config: &Config) -> Result<()> {
    match sizes::audit(&config.paths.artifacts, &config.paths.reports)? {
        Audit::NoArtifacts => {
            println!("No artifacts found. Compile the contracts first.");
        }
        Audit::Written { report, path } => {
            println!("{}", report.render());
            println!("Size report saved to {}", path.display());
            if report.has_oversized() {
                warn!("at least one contract exceeds the deployment limit");
            }
        }
    }
    Ok(())
}

async fn run_deploy(config: &Config, network: &str, run_tests: bool, keys: &Keys) -> Result<()> {
    let network = config.network(network)?;
    let mut chain = connect(&network, keys)?;

    let store = ArtifactStore::new(&config.paths.artifacts);
    let recorder = DeploymentRecorder::new(&config.paths.deployments);
    let verifier = explorer(config, &network, keys)?;

    let mut orchestrator = Orchestrator::new(&store, &recorder);
    if let Some(path) = config.legacy_deployment_file() {
        orchestrator = orchestrator.with_legacy_file(path);
    }
    if let Some(verifier) = &verifier {
        orchestrator = orchestrator.with_verifier(verifier, config.deploy.verification_delay());
    }

    let target = DeployTarget {
        network: &network.name,
        local: network.local,
    };
    let deployment = orchestrator
        .run(chain.as_mut(), &target, &config.deploy.contracts)
        .await?;

    println!("\n=== DEPLOYMENT ===");
    for (name, address) in &deployment.record.contracts {
        println!("{name}: {address}");
    }
    println!("Snapshot saved to {}", deployment.snapshot.display());

    if run_tests {
        let schema = &config.test_runner;
        let (address, contract) = deployment
            .address_of(&schema.contract)
            .zip(deployment.contract(&schema.contract))
            .ok_or_else(|| eyre!("test runner `{}` is not in the deployed set", schema.contract))?;
        let suite = Suite {
            address,
            abi: &contract.abi,
            schema,
        };
        let run = suite.run(chain.as_mut(), &config.paths.reports).await?;
        print_run(&run);
    }

    Ok(())
}

async fn run_test(
    config: &Config,
    network: &str,
    address: Option<Address>,
    use_latest: bool,
    keys: &Keys,
) -> Result<()> {
    let schema = &config.test_runner;
    let network = config.network(network)?;
    if network.endpoint == Endpoint::InMemory && (address.is_some() || use_latest) {
        bail!("`{}` starts empty on every run, deploy the test runner instead", network.name);
    }
    let mut chain = connect(&network, keys)?;
    let store = ArtifactStore::new(&config.paths.artifacts);

    let address = match (address, use_latest) {
        (Some(address), _) => address,
        (None, true) => {
            let recorder = DeploymentRecorder::new(&config.paths.deployments);
            let latest = recorder
                .latest(&network.name)?
                .ok_or_else(|| eyre!("no deployment recorded for `{}`", network.name))?;
            *latest.contracts.get(&schema.contract).ok_or_else(|| {
                eyre!("latest `{}` deployment has no `{}`", network.name, schema.contract)
            })?
        }
        (None, false) => {
            info!(contract = %schema.contract, "deploying test runner");
            let (_, _, address) =
                deploy::deploy_contract(chain.as_mut(), &store, &schema.contract).await?;
            println!("{} deployed at {address}", schema.contract);
            address
        }
    };

    let contract = store.load(&schema.contract)?;
    let suite = Suite {
        address,
        abi: &contract.abi,
        schema,
    };
    let run = suite.run(chain.as_mut(), &config.paths.reports).await?;
    print_run(&run);
    Ok(())
}

fn print_run(run: &SuiteRun) {
    println!("\n{}", run.render());
    println!("Results saved to {}", run.report_path.display());
}

fn connect(network: &Network, keys: &Keys) -> Result<Box<dyn Chain>> {
    match &network.endpoint {
        Endpoint::InMemory => {
            info!(network = %network.name, "using in-memory development network");
            Ok(Box::new(LocalChain::new()))
        }
        Endpoint::Rpc(url) => {
            let key = keys
                .private_key
                .as_deref()
                .ok_or_else(|| eyre!("PRIVATE_KEY is required for network `{}`", network.name))?;
            let chain = RpcChain::connect(url.clone(), key)
                .wrap_err_with(|| format!("cannot connect to `{}`", network.name))?;
            Ok(Box::new(chain))
        }
    }
}

fn explorer(config: &Config, network: &Network, keys: &Keys) -> Result<Option<EtherscanVerifier>> {
    if network.local {
        return Ok(None);
    }
    let Some(api_key) = keys.etherscan_api_key.clone() else {
        warn!("ETHERSCAN_API_KEY not set, contracts will not be verified");
        return Ok(None);
    };
    let Some(chain_id) = network.chain_id else {
        warn!(network = %network.name, "no chain_id configured, contracts will not be verified");
        return Ok(None);
    };
    let verifier = EtherscanVerifier::new(config.explorer.api_url.clone(), api_key, chain_id)?;
    Ok(Some(verifier))
}
