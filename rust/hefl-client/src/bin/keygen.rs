use std::path::PathBuf;

use anyhow::Context as _;
use hefl_core::crypto::{EncryptionContext, FullContext, SchemeParams};
use structopt::StructOpt;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "hefl-keygen",
    about = "Generates the context of a new deployment: a full context for the contributors and \
             its public view for the coordinator"
)]
struct Opt {
    /// Output path of the full context, which must only be distributed to contributors
    #[structopt(long, parse(from_os_str), default_value = "full.ctx")]
    full: PathBuf,

    /// Output path of the public context of the coordinator
    #[structopt(long, parse(from_os_str), default_value = "public.ctx")]
    public: PathBuf,

    /// Polynomial degree, which is also the maximal block capacity
    #[structopt(long, default_value = "8192")]
    degree: usize,

    /// Bit sizes of the ciphertext moduli
    #[structopt(long, use_delimiter = true, default_value = "62,62,62")]
    moduli_sizes: Vec<usize>,

    /// Fixed-point scale of the parameters, in bits
    #[structopt(long, default_value = "30")]
    scale_bits: u32,

    /// Fixed-point precision of the averaging weight, in bits
    #[structopt(long, default_value = "20")]
    weight_bits: u32,
}

fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opt = Opt::from_args();
    let scheme = SchemeParams {
        degree: opt.degree,
        moduli_sizes: opt.moduli_sizes,
        scale_bits: opt.scale_bits,
        weight_bits: opt.weight_bits,
        ..SchemeParams::default()
    };
    info!(
        "generating a context for {} slots, averaged values decode correctly below {}",
        scheme.slot_count(),
        scheme.max_magnitude()
    );

    let context = FullContext::generate(scheme).context("generating the context failed")?;
    context
        .save(&opt.full)
        .with_context(|| format!("writing {} failed", opt.full.display()))?;
    context
        .to_public()
        .save(&opt.public)
        .with_context(|| format!("writing {} failed", opt.public.display()))?;

    info!(
        "wrote the full context to {} and the public context to {} (fingerprint {})",
        opt.full.display(),
        opt.public.display(),
        context.fingerprint()
    );
    Ok(())
}
