use anyhow::{bail, Context};
use clap::Parser;
use fs_err as fs;
use std::path::{Path, PathBuf};

use neuroreport::cli::{Args, Command};
use neuroreport::config::Config;
use neuroreport::convert::LibreOfficeConverter;
use neuroreport::document::docx;
use neuroreport::session::{Entitlements, MemorySessionStore, SessionStore, SqliteSessionStore};
use neuroreport::{
    log, provider, ux, EntitlementError, GeneratorSettings, ReportError, ReportForm, ReportGenerator,
};

fn read_form(path: &Path) -> anyhow::Result<ReportForm> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).with_context(|| format!("invalid form JSON in {}", path.display()))
}

fn make_generator(cfg: &Config) -> anyhow::Result<ReportGenerator> {
    let prov = provider::make_provider(cfg)?;
    tracing::debug!(provider = %prov.describe(), "provider ready");
    Ok(ReportGenerator::new(
        prov,
        Box::new(LibreOfficeConverter::new(cfg.converter_program.clone())),
        GeneratorSettings::from_config(cfg),
    ))
}

fn open_store(cfg: &Config) -> anyhow::Result<Box<dyn SessionStore>> {
    match &cfg.session_db {
        Some(path) => Ok(Box::new(
            SqliteSessionStore::open(path)
                .with_context(|| format!("cannot open session db {}", path.display()))?,
        )),
        None => {
            tracing::warn!("no session_db configured; paid sessions live only for this process");
            Ok(Box::new(MemorySessionStore::new()))
        }
    }
}

/// Session service over the configured store, with abandoned submissions cleared.
fn entitlements(cfg: &Config) -> anyhow::Result<Entitlements<Box<dyn SessionStore>>> {
    let ent = Entitlements::new(open_store(cfg)?);
    if let Some(ttl) = cfg.session_ttl() {
        ent.purge_abandoned(ttl)?;
    }
    Ok(ent)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    log::init(args.debug);
    let cfg = Config::resolve(&args)?;

    match &args.command {
        Command::Template { out } => {
            fs::write(out, docx::starter_template()?)?;
            println!("template written to {}", out.display());
        }

        Command::Generate { form, pdf, out } => {
            let mut form = read_form(form)?;
            form.pdf |= *pdf;
            let generator = make_generator(&cfg)?;

            let pb = ux::spinner("generating report");
            let result = generator.generate(&form).await;
            pb.finish_and_clear();
            let report = match result {
                Ok(r) => r,
                Err(ReportError::UnsupportedConversion(why)) => {
                    bail!(
                        "PDF output is not supported on this host ({why}); \
                         run again without --pdf for the .docx"
                    );
                }
                Err(e) => return Err(e.into()),
            };

            let dest = out.clone().unwrap_or_else(|| PathBuf::from(report.download_name()));
            let bytes = report.persist_to(&dest)?;
            ux::print_summary(&report.summary, &dest, bytes);
        }

        Command::Checkout { form } => {
            let form = read_form(form)?;
            let ent = entitlements(&cfg)?;
            let id = ent.begin(&form)?;
            ux::print_session(&id);
        }

        Command::Confirm { session } => {
            let ent = entitlements(&cfg)?;
            let generator = make_generator(&cfg)?;
            let pb = ux::spinner("generating paid report");
            let result = ent.confirm(session, &generator).await;
            pb.finish_and_clear();
            let stored = result?;
            println!("report for {session} stored ({})", stored.format.as_str());
        }

        Command::Fetch { session, out } => {
            let ent = entitlements(&cfg)?;
            match ent.fetch(session) {
                Ok(stored) => {
                    let dest = out.clone().unwrap_or_else(|| PathBuf::from(stored.download_name()));
                    fs::write(&dest, &stored.bytes)?;
                    println!("report written to {}", dest.display());
                }
                Err(ReportError::MissingEntitlement(EntitlementError::NotReady(_))) => {
                    ux::print_waiting("payment not confirmed yet; try again shortly");
                }
                Err(ReportError::MissingEntitlement(EntitlementError::NotFound(id))) => {
                    bail!("no session {id}");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}
