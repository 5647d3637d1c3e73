use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};
use tracing::info;
use tracing_subscriber::EnvFilter;

use proof_of_trust::{
    attestation::{self, AttestationProof},
    client::{AttestationSource, FdcClient, VerifiedFeed},
    feed::{self, ArticlesFeedRequest},
    ledger::{ArticleBatch, ArticleLedger, Timestamp},
    settings::Settings,
    store::LedgerStore,
    Address,
};

mod report;

#[derive(Parser)]
#[command(
    name = "pot",
    version,
    about = "Proof of Trust: attested daily articles with one-vote sentiment tracking"
)]
struct Cli {
    /// Settings file (defaults to ./pot.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Ledger state file, overrides `state_path` from settings.
    #[arg(long, global = true)]
    state: Option<PathBuf>,
    /// Evaluate time rules at this unix timestamp instead of the system clock.
    #[arg(long, global = true)]
    at: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty ledger owned by `--owner`.
    Init {
        #[arg(long)]
        owner: Address,
    },
    /// Owner, freshness window and latest batch.
    Status,
    /// Today's articles, a given day's articles, or the latest batch.
    Articles {
        #[arg(long)]
        date: Option<u64>,
        #[arg(long, conflicts_with = "date")]
        top: bool,
    },
    /// One article, by id or by day and slot.
    #[command(group(ArgGroup::new("lookup").required(true).args(["id", "date"])))]
    Article {
        #[arg(long)]
        id: Option<u64>,
        #[arg(long, requires = "index")]
        date: Option<u64>,
        #[arg(long)]
        index: Option<usize>,
    },
    /// Days that hold articles.
    Dates,
    /// Cast a sentiment vote.
    #[command(group(ArgGroup::new("direction").required(true).args(["positive", "negative"])))]
    Vote {
        #[arg(long)]
        caller: Address,
        #[arg(long)]
        article: u64,
        #[arg(long)]
        positive: bool,
        #[arg(long)]
        negative: bool,
        #[arg(long, default_value = "")]
        comment: String,
    },
    /// Tally for an article plus `--user`'s own vote.
    Sentiment {
        #[arg(long)]
        article: u64,
        #[arg(long)]
        user: Address,
    },
    TransferOwnership {
        #[arg(long)]
        caller: Address,
        #[arg(long)]
        new_owner: Address,
    },
    /// Print the ledger's event log as JSON lines.
    Events,
    /// Ask the verifier to prepare the top-articles request.
    Prepare,
    /// Poll the DA layer for a round's proof and write it to `--out`.
    Fetch {
        #[arg(long)]
        round: u64,
        /// Skip preparation and use this encoded request.
        #[arg(long)]
        abi_encoded_request: Option<String>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Verify a proof file and apply its articles.
    Update {
        #[arg(long)]
        caller: Address,
        #[arg(long)]
        proof: PathBuf,
    },
    /// Prepare, fetch, verify and apply in one go.
    Sync {
        #[arg(long)]
        caller: Address,
        #[arg(long)]
        round: u64,
    },
    /// Generate an Ed25519 committee key pair.
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Build a round from attested responses and sign its root.
    Attest {
        #[arg(long = "response", required = true)]
        responses: Vec<PathBuf>,
        #[arg(long)]
        round: u64,
        #[arg(long)]
        member: String,
        #[arg(long)]
        sk_hex: String,
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Add a committee signature to an existing proof file.
    Cosign {
        proof: PathBuf,
        #[arg(long)]
        member: String,
        #[arg(long)]
        sk_hex: String,
    },
}

//==================== shared helpers ====================//

fn now(at: Option<u64>) -> Result<Timestamp> {
    match at {
        Some(ts) => Ok(ts),
        None => Ok(SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock before unix epoch")?
            .as_secs()),
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_sk_hex(sk_hex: &str) -> Result<SigningKey> {
    let bytes = hex::decode(sk_hex.trim()).context("invalid --sk-hex")?;
    let raw: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("--sk-hex must be exactly 32 bytes (64 hex chars)"))?;
    Ok(SigningKey::from_bytes(&raw))
}

fn read_proof(path: &Path) -> Result<AttestationProof> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse proof {}", path.display()))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("mkdir {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(value)?;
    fs::write(path, json).with_context(|| format!("write {}", path.display()))
}

fn fdc_client(settings: &Settings) -> Result<FdcClient> {
    Ok(FdcClient::new(
        &settings.verifier_url,
        &settings.verifier_api_key,
        &settings.da_layer_url,
        settings.poll_policy(),
    )?)
}

fn apply_batch(
    store: &LedgerStore,
    caller: &Address,
    batch: ArticleBatch,
    now: Timestamp,
) -> Result<()> {
    let mut ledger = store.load()?;
    let ids = ledger.update(caller, batch, now)?;
    store.save(&ledger)?;

    println!("ARTICLES UPDATED (update #{})", ledger.update_count());
    println!();
    let stored: Vec<_> = ids
        .iter()
        .filter_map(|id| ledger.article_by_id(*id).ok())
        .collect();
    report::print_articles(&ledger, &stored, now);
    println!("- Total Articles Available: {}", ledger.total_articles());
    println!("- Current Date: {}", ledger.current_date(now));
    println!("- Available Dates: {}", ledger.available_dates().len());
    println!(
        "- Next Update In: {}h",
        ledger.time_until_next_update(now) / 3600
    );
    Ok(())
}

//==================== ledger commands ====================//

fn articles_cmd(ledger: &ArticleLedger, date: Option<u64>, top: bool, now: Timestamp) {
    if top {
        let top = ledger.top_articles();
        let articles: Vec<_> = top.articles.iter().collect();
        report::print_articles(ledger, &articles, now);
        println!("Total Articles Available: {}", top.total_articles);
        return;
    }
    let articles = match date {
        Some(day) => ledger.articles_by_date(day),
        None => ledger.todays_articles(now),
    };
    report::print_articles(ledger, &articles, now);
}

fn article_cmd(
    ledger: &ArticleLedger,
    id: Option<u64>,
    date: Option<u64>,
    index: Option<usize>,
    now: Timestamp,
) -> Result<()> {
    let article = match (id, date, index) {
        (Some(id), _, _) => ledger.article_by_id(id)?,
        (None, Some(day), Some(index)) => ledger.article_by_index(day, index)?,
        _ => bail!("pass --id, or --date together with --index"),
    };
    report::print_article(ledger, article, now);
    Ok(())
}

//==================== attestation tooling ====================//

/// Create `path` readable by the owner only (0600 on unix).
fn write_secret(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("write {}", path.display()))?;
    // mode only applies on creation, so tighten pre-existing files too
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)
        .with_context(|| format!("write {}", path.display()))
}

fn keygen_cmd(out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("mkdir {}", out_dir.display()))?;
    let mut sk_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut sk_bytes);
    let sk = SigningKey::from_bytes(&sk_bytes);
    let pk = sk.verifying_key();
    write_secret(&out_dir.join("sk.hex"), hex::encode(sk_bytes).as_bytes())?;
    fs::write(out_dir.join("pk.hex"), hex::encode(pk.as_bytes()))?;
    println!("keypair written → {}", out_dir.display());
    Ok(())
}

fn attest_cmd(
    responses: &[PathBuf],
    round: u64,
    member: &str,
    sk_hex: &str,
    out_dir: &Path,
) -> Result<()> {
    let sk = parse_sk_hex(sk_hex)?;
    let mut bodies = Vec::with_capacity(responses.len());
    for path in responses {
        let body = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        // refuse to attest something the ledger could never accept
        feed::decode_response(&body)
            .with_context(|| format!("{} is not an articles response", path.display()))?;
        bodies.push(body);
    }
    let proofs = attestation::build_round(round, &bodies, member, &sk);
    for (idx, proof) in proofs.iter().enumerate() {
        write_json(&out_dir.join(format!("proof_{idx:03}.json")), proof)?;
    }
    println!(
        "round {} attested: {} proofs, root {} → {}",
        round,
        proofs.len(),
        proofs
            .first()
            .map(|p| hex::encode(p.round_root.merkle_root))
            .unwrap_or_default(),
        out_dir.display()
    );
    Ok(())
}

fn cosign_cmd(path: &Path, member: &str, sk_hex: &str) -> Result<()> {
    let sk = parse_sk_hex(sk_hex)?;
    let mut proof = read_proof(path)?;
    proof.round_root.sign(member, &sk);
    write_json(path, &proof)?;
    println!(
        "{} signed round {} ({} signatures)",
        member,
        proof.voting_round_id,
        proof.round_root.signatures.len()
    );
    Ok(())
}

//==================== main ====================//

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    init_tracing(&settings.log_level);

    let store = LedgerStore::new(cli.state.clone().unwrap_or_else(|| settings.state_path.clone()));
    let now = now(cli.at)?;

    match cli.command {
        Command::Init { owner } => {
            store.create(&ArticleLedger::new(owner))?;
            info!(%owner, path = %store.path().display(), "ledger initialised");
            println!("ledger created → {} (owner {})", store.path().display(), owner);
        }
        Command::Status => report::print_status(&store.load()?, now),
        Command::Articles { date, top } => articles_cmd(&store.load()?, date, top, now),
        Command::Article { id, date, index } => article_cmd(&store.load()?, id, date, index, now)?,
        Command::Dates => {
            let ledger = store.load()?;
            for day in ledger.available_dates() {
                println!("{day}\t{}", report::iso(day * 86_400));
            }
        }
        Command::Vote {
            caller,
            article,
            positive,
            negative: _,
            comment,
        } => {
            let mut ledger = store.load()?;
            ledger.submit_sentiment(&caller, article, positive, comment, now)?;
            store.save(&ledger)?;
            let view = ledger.article_sentiment(article, &caller, now)?;
            println!("vote recorded on article {article}");
            report::print_sentiment(&view);
        }
        Command::Sentiment { article, user } => {
            let view = store.load()?.article_sentiment(article, &user, now)?;
            println!("SENTIMENT for article {article}");
            report::print_sentiment(&view);
        }
        Command::TransferOwnership { caller, new_owner } => {
            let mut ledger = store.load()?;
            ledger.transfer_ownership(&caller, new_owner)?;
            store.save(&ledger)?;
            println!("ownership transferred {caller} → {new_owner}");
        }
        Command::Events => {
            for event in store.load()?.events() {
                println!("{}", serde_json::to_string(event)?);
            }
        }
        Command::Prepare => {
            let request = ArticlesFeedRequest::top_articles(&settings.articles_api_url);
            let prepared = fdc_client(&settings)?.prepare_request(&request)?;
            println!("{}", prepared.abi_encoded_request);
        }
        Command::Fetch {
            round,
            abi_encoded_request,
            out,
        } => {
            let client = fdc_client(&settings)?;
            let encoded = match abi_encoded_request {
                Some(encoded) => encoded,
                None => {
                    let request = ArticlesFeedRequest::top_articles(&settings.articles_api_url);
                    client.prepare_request(&request)?.abi_encoded_request
                }
            };
            let proof = client.retrieve_proof(&encoded, round)?;
            write_json(&out, &proof)?;
            println!("proof for round {round} → {}", out.display());
        }
        Command::Update { caller, proof } => {
            let committee = settings.committee()?;
            let response = read_proof(&proof)?
                .verify(&committee)
                .context("attestation proof rejected")?;
            let batch = feed::decode_response(&response)?;
            apply_batch(&store, &caller, batch, now)?;
        }
        Command::Sync { caller, round } => {
            let client = fdc_client(&settings)?;
            let committee = settings.committee()?;
            let source = VerifiedFeed {
                client: &client,
                committee: &committee,
                request: ArticlesFeedRequest::top_articles(&settings.articles_api_url),
                voting_round_id: round,
            };
            let batch = source.fetch_verified_batch()?;
            apply_batch(&store, &caller, batch, now)?;
        }
        Command::Keygen { out_dir } => keygen_cmd(&out_dir)?,
        Command::Attest {
            responses,
            round,
            member,
            sk_hex,
            out_dir,
        } => attest_cmd(&responses, round, &member, &sk_hex, &out_dir)?,
        Command::Cosign {
            proof,
            member,
            sk_hex,
        } => cosign_cmd(&proof, &member, &sk_hex)?,
    }
    Ok(())
}
