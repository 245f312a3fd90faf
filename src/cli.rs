//! Command-line surface: one subcommand per stage, plus export and status.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::errors::AppError;
use crate::export::{create_output, export_table, export_websites};
use crate::runner::{RunOptions, StageReport, StageRunner, StageWorker};
use crate::stages::{
    discover_companies, seed_countries, ApolloStage, CertificateDetailsStage, CertificateIdsStage,
    CleanWebsiteStage, CompanyDetailsStage, CountrySource, DeviceDetailsStage, DevicesStage,
    EmployeesStage, PipelineContext, RankingStage, SearchWebsiteStage,
};
use crate::store::{SourceFilter, Table};

/// Batch size when a stage does not set its own.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// The enrichment API is quota-limited, so it runs one company at a time.
pub const APOLLO_BATCH_SIZE: usize = 1;
pub const APOLLO_PAUSE_MS: u64 = 2000;

#[derive(Parser, Debug)]
#[command(name = "eudamed-enrich")]
#[command(about = "Medical-device manufacturer enrichment pipeline")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Record selection and pacing shared by all stage subcommands.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct StageArgs {
    /// Only companies from this country (ISO alpha-2)
    #[arg(long)]
    pub country: Option<String>,

    /// Only companies of this registry actor type (e.g. MF)
    #[arg(long)]
    pub actor_type: Option<String>,

    /// Records per batch, also the number processed concurrently (1-50)
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Also pick up records whose last attempt at this stage failed
    #[arg(long)]
    pub retry_errors: bool,

    /// Pause between batches in milliseconds
    #[arg(long)]
    pub pause_ms: Option<u64>,

    /// Stop after this many records
    #[arg(short, long)]
    pub limit: Option<usize>,
}

impl StageArgs {
    pub fn options(&self, default_batch: usize, default_pause_ms: Option<u64>) -> RunOptions {
        RunOptions {
            batch_size: self.batch_size.unwrap_or(default_batch),
            filter: SourceFilter {
                country: self.country.as_ref().map(|c| c.trim().to_uppercase()),
                actor_type: self.actor_type.clone(),
            },
            retry_errors: self.retry_errors,
            pause: self
                .pause_ms
                .or(default_pause_ms)
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportTarget {
    Companies,
    Products,
    Certificates,
    Apollo,
    /// One `*.{domain}/*` pattern per company website
    Websites,
}

impl ExportTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportTarget::Companies => "companies",
            ExportTarget::Products => "products",
            ExportTarget::Certificates => "certificates",
            ExportTarget::Apollo => "apollo",
            ExportTarget::Websites => "websites",
        }
    }

    /// `eudamed_{target}_{yyyymmdd}.csv`
    pub fn default_path(&self, date: NaiveDate) -> PathBuf {
        PathBuf::from(format!("eudamed_{}_{}.csv", self.as_str(), date.format("%Y%m%d")))
    }

    /// Table exported verbatim; `None` for the website pattern list.
    pub fn table(&self) -> Option<Table> {
        match self {
            ExportTarget::Companies => Some(Table::Companies),
            ExportTarget::Products => Some(Table::Products),
            ExportTarget::Certificates => Some(Table::Certificates),
            ExportTarget::Apollo => Some(Table::PartnerCompanies),
            ExportTarget::Websites => None,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fill the countries table that company discovery iterates
    SeedCountries {
        /// Use the country list shipped with the binary instead of the registry
        #[arg(long)]
        bundled: bool,
    },

    /// Discover registry actors per country and store unseen companies
    CompanyIds {
        /// Countries to list (ISO alpha-2, repeatable). Defaults to the countries table
        #[arg(long = "country")]
        countries: Vec<String>,
    },

    /// Fetch registry details, city and contact persons of each company
    CompanyDetails(StageArgs),

    /// Find the official website of companies without one
    SearchWebsites(StageArgs),

    /// Reduce company websites to a bare domain
    CleanWebsites(StageArgs),

    /// List the devices of each company
    Devices(StageArgs),

    /// Fetch registry details of each device
    DeviceDetails(StageArgs),

    /// List the certificates of each company
    CertificateIds(StageArgs),

    /// Fetch certificate details, notified bodies, scopes and documents
    CertificateDetails(StageArgs),

    /// Estimate employee counts from web pages
    Employees(StageArgs),

    /// Enrich companies with firmographics (one at a time, paced)
    Apollo(StageArgs),

    /// Compute the ranking score of each company
    Ranking(StageArgs),

    /// Write a table to CSV
    Export {
        #[arg(value_enum)]
        target: ExportTarget,

        /// Output file, defaults to eudamed_<target>_<date>.csv
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show record counts per status tag
    Status,
}

async fn run_stage<W: StageWorker>(
    runner: &StageRunner,
    worker: &W,
    options: RunOptions,
) -> Result<(), AppError> {
    let report = runner.run(worker, &options).await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &StageReport) {
    println!(
        "{} processed, {} advanced, {} without input, {} failed",
        report.processed,
        report.advanced,
        report.skipped,
        report.failed.len()
    );
    for (id, error) in &report.failed {
        println!("  {}: {}", id, error);
    }
}

/// Runs one subcommand against the pipeline context.
pub async fn execute(command: Command, ctx: &PipelineContext) -> Result<(), AppError> {
    let runner = StageRunner::new(ctx.store.clone());
    let defaults = |args: &StageArgs| args.options(DEFAULT_BATCH_SIZE, None);

    match command {
        Command::SeedCountries { bundled } => {
            let source = if bundled {
                CountrySource::Bundled
            } else {
                CountrySource::Registry
            };
            let report = seed_countries(ctx, source).await?;
            println!(
                "{} countries seen, {} upserted, {} skipped",
                report.seen, report.upserted, report.skipped
            );
        }
        Command::CompanyIds { countries } => {
            let countries = (!countries.is_empty()).then_some(countries);
            let report = discover_companies(ctx, countries).await?;
            println!(
                "{} countries, {} actors seen, {} inserted, {} failed",
                report.countries,
                report.seen,
                report.inserted,
                report.failed.len()
            );
            for (country, error) in &report.failed {
                println!("  {}: {}", country, error);
            }
        }
        Command::CompanyDetails(args) => {
            run_stage(&runner, &CompanyDetailsStage::new(ctx), defaults(&args)).await?
        }
        Command::SearchWebsites(args) => {
            run_stage(&runner, &SearchWebsiteStage::new(ctx), defaults(&args)).await?
        }
        Command::CleanWebsites(args) => {
            run_stage(&runner, &CleanWebsiteStage::new(ctx), defaults(&args)).await?
        }
        Command::Devices(args) => {
            run_stage(&runner, &DevicesStage::new(ctx), defaults(&args)).await?
        }
        Command::DeviceDetails(args) => {
            run_stage(&runner, &DeviceDetailsStage::new(ctx), defaults(&args)).await?
        }
        Command::CertificateIds(args) => {
            run_stage(&runner, &CertificateIdsStage::new(ctx), defaults(&args)).await?
        }
        Command::CertificateDetails(args) => {
            run_stage(&runner, &CertificateDetailsStage::new(ctx), defaults(&args)).await?
        }
        Command::Employees(args) => {
            run_stage(&runner, &EmployeesStage::new(ctx), defaults(&args)).await?
        }
        Command::Apollo(args) => {
            let options = args.options(APOLLO_BATCH_SIZE, Some(APOLLO_PAUSE_MS));
            run_stage(&runner, &ApolloStage::new(ctx), options).await?
        }
        Command::Ranking(args) => {
            run_stage(&runner, &RankingStage::new(ctx), defaults(&args)).await?
        }
        Command::Export { target, out } => {
            let out = out.unwrap_or_else(|| target.default_path(Local::now().date_naive()));
            let file = create_output(&out)?;
            let written = match target.table() {
                Some(table) => export_table(ctx.store.as_ref(), table, file).await?,
                None => export_websites(ctx.store.as_ref(), file).await?,
            };
            println!("Wrote {} row(s) to {}", written, out.display());
        }
        Command::Status => {
            for table in [Table::Companies, Table::Products, Table::Certificates] {
                println!("{}", table.name());
                for count in ctx.store.status_counts(table).await? {
                    println!(
                        "  {:<28} {:>8}  ({} failed)",
                        count.scraping_status.as_deref().unwrap_or("(none)"),
                        count.count,
                        count.failed
                    );
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apollo_defaults_to_paced_single_record() {
        let cli = Cli::try_parse_from(["eudamed-enrich", "apollo"]).unwrap();
        let Command::Apollo(args) = cli.command else {
            panic!("expected apollo");
        };
        let options = args.options(APOLLO_BATCH_SIZE, Some(APOLLO_PAUSE_MS));
        assert_eq!(options.batch_size, 1);
        assert_eq!(options.pause, Some(Duration::from_millis(2000)));
    }

    #[test]
    fn test_stage_args() {
        let cli = Cli::try_parse_from([
            "eudamed-enrich",
            "-v",
            "device-details",
            "--country",
            "at",
            "--batch-size",
            "25",
            "--retry-errors",
            "--limit",
            "100",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::DeviceDetails(args) = cli.command else {
            panic!("expected device-details");
        };
        let options = args.options(DEFAULT_BATCH_SIZE, None);
        assert_eq!(options.batch_size, 25);
        assert_eq!(options.filter.country.as_deref(), Some("AT"));
        assert!(options.retry_errors);
        assert_eq!(options.limit, Some(100));
        assert_eq!(options.pause, None);
    }

    #[test]
    fn test_company_ids_takes_repeated_countries() {
        let cli =
            Cli::try_parse_from(["eudamed-enrich", "company-ids", "--country", "AT", "--country", "DE"])
                .unwrap();
        match cli.command {
            Command::CompanyIds { countries } => assert_eq!(countries, vec!["AT", "DE"]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_seed_countries_flag() {
        let cli = Cli::try_parse_from(["eudamed-enrich", "seed-countries", "--bundled"]).unwrap();
        assert!(matches!(cli.command, Command::SeedCountries { bundled: true }));
        let cli = Cli::try_parse_from(["eudamed-enrich", "seed-countries"]).unwrap();
        assert!(matches!(cli.command, Command::SeedCountries { bundled: false }));
    }

    #[test]
    fn test_export_target() {
        let cli = Cli::try_parse_from(["eudamed-enrich", "export", "websites", "--out", "w.csv"])
            .unwrap();
        match cli.command {
            Command::Export { target, out } => {
                assert_eq!(target, ExportTarget::Websites);
                assert_eq!(target.table(), None);
                assert_eq!(out, Some(PathBuf::from("w.csv")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_default_export_path() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(
            ExportTarget::Apollo.default_path(date),
            PathBuf::from("eudamed_apollo_20240307.csv")
        );
    }
}
