use std::path::PathBuf;
use std::sync::Arc;

use ark_std::rand::SeedableRng as _;
use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng as _};
use threshold_proxy_reencryption::{
    config::GrantConfig,
    dem::{decrypt, encrypt},
    error::{ConfigError, GrantError, PreError, SelectionError},
    grant::{grant_policy, recover_capsule},
    keys::SecretKey,
    prefetch::PrefetchStrategy,
    registry::{Address, InMemoryRegistry, Staker},
    reservoir::MergedReservoir,
    simulation::SimulatedNetwork,
    suite::{Bls12_381XChaCha, Bn254ChaCha, CipherSuite, SuiteId},
    wire,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    about = "Grants a threshold re-encryption policy over a simulated proxy network",
    author,
    version
)]
struct Cli {
    /// Curve and cipher combination
    #[arg(long = "suite", value_enum, default_value = "bls12-381")]
    suite: SuiteId,

    /// Number of staked proxies in the registry
    #[arg(long = "proxies", default_value_t = 10)]
    proxies: u64,

    /// Partials needed to decrypt (m)
    #[arg(long = "threshold", default_value_t = 3)]
    threshold: usize,

    /// Fragments to distribute (n)
    #[arg(long = "shares", default_value_t = 5)]
    shares: usize,

    /// Proxies that never answer
    #[arg(long = "offline", default_value_t = 2)]
    offline: usize,

    /// Proxies that answer with corrupted partials
    #[arg(long = "byzantine", default_value_t = 1)]
    byzantine: usize,

    /// JSON grant config; flags below override it
    #[arg(long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Per-proxy contact timeout in milliseconds
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    #[arg(long = "label")]
    label: Option<String>,

    #[arg(long = "message", default_value = "hello from the delegator")]
    message: String,

    /// Seed for every random choice; random if omitted
    #[arg(long = "seed")]
    seed: Option<u64>,
}

#[derive(thiserror::Error, Debug)]
enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Grant(#[from] GrantError),
    #[error(transparent)]
    Crypto(#[from] PreError),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let outcome = match cli.suite {
        SuiteId::Bls12_381XChaCha => run::<Bls12_381XChaCha>(&cli).await,
        SuiteId::Bn254ChaCha => run::<Bn254ChaCha>(&cli).await,
    };
    if let Err(e) = outcome {
        eprintln!("Simulation failed: {e}");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<GrantConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => GrantConfig::from_json_file(path)?,
        None => GrantConfig::default(),
    };
    if let Some(timeout_ms) = cli.timeout_ms {
        config.contact_timeout_ms = timeout_ms;
    }
    if let Some(label) = &cli.label {
        config.label = label.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run<S: CipherSuite>(cli: &Cli) -> Result<(), SimError> {
    let config = load_config(cli)?;
    let seed = cli.seed.unwrap_or_else(|| rand::rng().random());
    info!(suite = ?S::ID, seed, "starting simulation");

    let mut selection_rng = StdRng::seed_from_u64(seed);
    let mut crypto_rng = ark_std::rand::rngs::StdRng::seed_from_u64(seed);

    let registry = InMemoryRegistry::new();
    let mut addresses: Vec<Address> = (1..=cli.proxies).map(Address::from_low_u64).collect();
    for address in &addresses {
        registry.add_staker(Staker {
            address: *address,
            stake: selection_rng.random_range(1..=1_000),
            locked_periods: config.duration_periods + selection_rng.random_range(0..3),
        });
    }

    let network = Arc::new(SimulatedNetwork::<S::Curve>::new());
    addresses.shuffle(&mut selection_rng);
    let (offline, rest) = addresses.split_at(cli.offline.min(addresses.len()));
    for address in offline {
        network.set_offline(*address, true);
    }
    let byzantine = &rest[..cli.byzantine.min(rest.len())];
    info!(
        proxies = cli.proxies,
        offline = offline.len(),
        byzantine = byzantine.len(),
        "registry ready"
    );

    let reservoir = MergedReservoir::new(
        &registry,
        config.include.clone(),
        config.exclude.clone(),
        config.pagination_size,
        config.duration_periods,
        selection_rng,
    )?;
    let strategy = PrefetchStrategy::new(reservoir, cli.shares)?;

    let alice = SecretKey::<S::Curve>::random(&mut crypto_rng);
    let bob = SecretKey::<S::Curve>::random(&mut crypto_rng);

    let granted = grant_policy(
        Arc::clone(&network),
        &alice,
        &bob.public_key(),
        cli.threshold,
        cli.shares,
        strategy,
        &config,
        &mut crypto_rng,
    )
    .await?;
    for arrangement in &granted.arrangements {
        info!(proxy = %arrangement.address, fragment = ?arrangement.fragment_id, "arranged");
    }

    // proxies misbehave only once they hold a fragment
    for address in byzantine {
        network.set_byzantine(*address, true);
    }

    let (capsule, ciphertext) =
        encrypt::<S, _>(&alice.public_key(), cli.message.as_bytes(), &mut crypto_rng)?;
    let capsule_bytes = wire::encode::<S, _>(&capsule)?;
    info!(
        capsule_bytes = capsule_bytes.len(),
        ciphertext_bytes = ciphertext.len(),
        "encrypted message"
    );

    let bobs_capsule = recover_capsule(Arc::clone(&network), &granted, &capsule, &config).await?;
    let plaintext = decrypt::<S>(&bob, &bobs_capsule, &ciphertext)?;

    println!("policy:    {}", granted.policy.id);
    println!(
        "threshold: {} of {}",
        granted.policy.threshold, granted.policy.shares
    );
    println!("plaintext: {}", String::from_utf8_lossy(&plaintext));
    Ok(())
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .try_init();
    });
}
