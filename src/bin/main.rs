use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use mailsieve::{
    email, executor, xml, Envelope, FilterConfig, FilterEngine, RecordingSink, Registry,
    ScriptKind,
};
use tracing_subscriber::EnvFilter;

/// Run Sieve scripts against a message and show what would happen to it.
#[derive(clap::Parser)]
#[clap(about, version)]
struct Args {
    /// User script
    #[clap(short, long)]
    script: PathBuf,

    /// Admin script evaluated before the user script
    #[clap(long)]
    before: Option<PathBuf>,

    /// Admin script evaluated after the user script
    #[clap(long)]
    after: Option<PathBuf>,

    /// Filter settings (toml format)
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Envelope sender
    #[clap(long)]
    from: Option<String>,

    /// Envelope recipients
    #[clap(long)]
    to: Vec<String>,

    /// Print the rules in their XML form instead of evaluating them
    #[clap(long)]
    xml: bool,

    /// RFC 5322 message to filter
    message: Option<PathBuf>,
}

const ACCOUNT: &str = "cli";

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = <Args as clap::Parser>::parse();
    let config = match &args.config {
        Some(path) => FilterConfig::load(path)
            .with_context(|| format!("Cannot load {}", path.display()))?,
        None => FilterConfig::default(),
    };
    let engine = FilterEngine::new(config, Registry::new());

    let layers = [
        (ScriptKind::AdminBefore, args.before.as_ref()),
        (ScriptKind::User, Some(&args.script)),
        (ScriptKind::AdminAfter, args.after.as_ref()),
    ];
    for (kind, path) in &layers {
        if let Some(path) = path {
            let source = fs::read_to_string(path)
                .with_context(|| format!("Cannot read {}", path.display()))?;
            engine
                .set_script(ACCOUNT, *kind, &source)
                .with_context(|| format!("Cannot compile {}", path.display()))?;
        }
    }

    if args.xml {
        for (kind, script) in engine.cache().layers(ACCOUNT) {
            println!("<!-- {} -->", kind);
            println!("{}", xml::to_xml(&script)?);
        }
        return Ok(());
    }

    let path = args
        .message
        .as_ref()
        .context("A message file is needed unless --xml is given")?;
    let raw = fs::read(path).with_context(|| format!("Cannot read {}", path.display()))?;
    let message = email::parse(&raw).with_context(|| format!("Cannot parse {}", path.display()))?;
    let envelope = if args.from.is_some() || !args.to.is_empty() {
        Some(Envelope::new(args.from.clone(), args.to.clone()))
    } else {
        None
    };

    let result = engine.evaluate(ACCOUNT, &message, envelope.as_ref());
    println!("state: {:?}", result.state);
    for action in &result.actions {
        println!("action: {}", mailsieve::emit::action_text(action));
    }
    for (kind, error) in &result.layer_errors {
        println!("{} layer failed: {}", kind, error);
    }

    let mut sink = RecordingSink::default();
    match executor::execute(&result, &message, envelope.as_ref(), engine.config(), &mut sink) {
        Ok(plan) => {
            for call in &sink.calls {
                println!("delivery: {}", call);
            }
            println!("{:#?}", plan);
            Ok(())
        }
        Err(e) => {
            for call in &sink.calls {
                println!("delivery: {}", call);
            }
            Err(e.into())
        }
    }
}
