use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use trackit_lib::agents::{
    Agent, AgentError, AnalysisAgent, AnalysisRequest, QueryAgent, QueryRequest, RecordRequest,
    RecordingAgent,
};
use trackit_lib::analysis::{save_report, Analyzer, ExportFormat, ReportFormat, ReportGenerator};
use trackit_lib::config::{self, Settings};
use trackit_lib::db::{now, EntryFilter, Repository};
use trackit_lib::extraction::{Extractor, IntentClassifier};
use trackit_lib::llm::{CompletionApi, LlmClient};
use trackit_lib::models::{Category, Entry, WeekId};

#[derive(Parser, Debug)]
#[command(name = "trackit", version, about = "Plain-language habit tracker")]
struct Cli {
    /// Database file, overriding configuration.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print LLM token and cost counters when the command finishes.
    #[arg(long, global = true)]
    show_usage: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a habit from a plain-language statement.
    Record {
        text: String,
        /// Date the entry belongs to (YYYY-MM-DD).
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show what would be recorded without storing it.
    Preview { text: String },
    /// Ask a question about your habits.
    Query { text: String },
    /// Patterns, trends, exports, reports or insights, chosen from the request.
    Analyze {
        text: String,
        #[arg(
            long,
            value_parser = clap::value_parser!(u32).range(1..=i64::from(config::MAX_WINDOW_WEEKS))
        )]
        weeks: Option<u32>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Weekly report for an ISO week, the current one by default.
    Report {
        #[arg(long)]
        week: Option<WeekId>,
        /// Rebuild even if a stored report exists.
        #[arg(long)]
        force: bool,
        #[arg(long)]
        save: Option<PathBuf>,
        #[arg(long, default_value = "md")]
        format: ReportFormat,
    },
    /// List entries.
    Entries {
        #[arg(long, conflicts_with_all = ["from", "to", "recent"])]
        date: Option<NaiveDate>,
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
        #[arg(long, conflicts_with_all = ["from", "to"])]
        recent: Option<usize>,
        #[arg(long)]
        category: Option<Category>,
    },
    /// Totals by category and mood.
    Stats {
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        category: Option<Category>,
    },
    /// Write entries to CSV or JSON.
    Export {
        #[arg(long)]
        format: ExportFormat,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        category: Option<Category>,
    },
    /// Configured provider, models and pricing.
    Usage,
}

fn main() {
    if let Err(error) = run() {
        match error.downcast_ref::<AgentError>() {
            Some(agent_error) => {
                tracing::error!(kind = ?agent_error.kind(), error = %agent_error, "Command failed");
                eprintln!("{}", agent_error.user_message());
            }
            None => eprintln!("trackit error: {error:#}"),
        }
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load_with_dotenv().context("failed to load settings")?;
    trackit_lib::init_tracing(&settings.log_filter);
    if let Some(db) = cli.db {
        settings.database.path = db;
    }
    tracing::debug!(version = config::APP_VERSION, db = %settings.database.path.display(), "Starting");

    let mut app = App::new(settings);
    match cli.command {
        Command::Record { text, date } => {
            let agent = RecordingAgent::new(app.extractor()?, app.repository()?);
            let outcome = agent.execute(RecordRequest::new(text).on(date))?;
            println!("{}", outcome.feedback);
        }
        Command::Preview { text } => {
            let agent = RecordingAgent::new(app.extractor()?, app.repository()?);
            let preview = agent.preview(&RecordRequest::new(text))?;
            println!("{}", preview.feedback);
            println!("{}", serde_json::to_string_pretty(&preview.entry)?);
        }
        Command::Query { text } => {
            let classifier =
                IntentClassifier::new(app.llm()?, app.settings.llm.classification_model.clone());
            let agent = QueryAgent::new(classifier, app.analyzer()?);
            let answer = agent.execute(QueryRequest {
                text,
                today: now().date(),
            })?;
            println!("{}", answer.response);
        }
        Command::Analyze { text, weeks, out } => {
            let analyzer = app.analyzer()?;
            let reports = app.report_generator(analyzer.clone());
            let agent = AnalysisAgent::new(analyzer, reports, std::env::current_dir()?);
            let mut request = AnalysisRequest::new(text, now().date());
            request.weeks = weeks;
            request.output = out;
            println!("{}", agent.execute(request)?.text);
        }
        Command::Report {
            week,
            force,
            save,
            format,
        } => {
            let analyzer = app.analyzer()?;
            let generator = app.report_generator(analyzer);
            let week = week.unwrap_or_else(|| WeekId::containing(now().date()));
            let report = generator.generate(week, force).map_err(AgentError::from)?;
            let document = report.document().map_err(AgentError::from)?;
            match save {
                Some(path) => {
                    save_report(&report, &path, format).map_err(AgentError::from)?;
                    println!("Report for {week} saved to {}", path.display());
                }
                None => match format {
                    ReportFormat::Markdown => println!("{}", document.markdown),
                    ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&document)?),
                },
            }
        }
        Command::Entries {
            date,
            from,
            to,
            recent,
            category,
        } => {
            let repo = app.repository()?;
            let entries = match (date, from.zip(to)) {
                (Some(day), _) => {
                    repo.entries_between(&EntryFilter::between(day, day).with_category(category))
                }
                (None, Some((start, end))) => {
                    repo.entries_between(&EntryFilter::between(start, end).with_category(category))
                }
                (None, None) => repo.recent_entries(recent.unwrap_or(10), category),
            }
            .map_err(AgentError::from)?;
            if entries.is_empty() {
                println!("No entries found.");
            }
            for entry in &entries {
                println!("{}", format_entry(entry));
            }
        }
        Command::Stats { from, to, category } => {
            let filter = optional_window(from, to, category);
            let stats = app
                .repository()?
                .statistics(&filter)
                .map_err(AgentError::from)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            println!("Positive rate: {:.0}%", stats.positive_rate() * 100.0);
        }
        Command::Export {
            format,
            out,
            from,
            to,
            category,
        } => {
            let rows = app
                .analyzer()?
                .export(&optional_window(from, to, category), format, &out)
                .map_err(AgentError::from)?;
            println!("Exported {rows} entries to {}", out.display());
        }
        Command::Usage => {
            let llm = &app.settings.llm;
            println!("Provider: {:?}", llm.provider);
            println!(
                "Models: extraction {}, classification {}, report {}",
                llm.extraction_model, llm.classification_model, llm.report_model
            );
            println!("API key: {}", if llm.api_key.is_some() { "set" } else { "missing" });
            println!("{}", serde_json::to_string_pretty(&llm.pricing)?);
        }
    }

    if cli.show_usage {
        if let Some(client) = &app.client {
            println!("{}", serde_json::to_string_pretty(&client.usage())?);
        }
    }
    Ok(())
}

/// Lazily built services so commands that never call the LLM work without a key.
struct App {
    settings: Settings,
    client: Option<Arc<LlmClient>>,
}

impl App {
    fn new(settings: Settings) -> Self {
        Self {
            settings,
            client: None,
        }
    }

    fn repository(&self) -> anyhow::Result<Repository> {
        Repository::open(&self.settings.database.path)
            .map_err(AgentError::from)
            .map_err(Into::into)
    }

    fn analyzer(&self) -> anyhow::Result<Analyzer> {
        Ok(Analyzer::new(self.repository()?, self.settings.analysis.clone()))
    }

    fn client(&mut self) -> anyhow::Result<Arc<LlmClient>> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let client =
            Arc::new(LlmClient::from_settings(&self.settings.llm).map_err(AgentError::from)?);
        self.client = Some(client.clone());
        Ok(client)
    }

    fn llm(&mut self) -> anyhow::Result<Arc<dyn CompletionApi>> {
        let client: Arc<dyn CompletionApi> = self.client()?;
        Ok(client)
    }

    fn extractor(&mut self) -> anyhow::Result<Arc<Extractor>> {
        Ok(Arc::new(Extractor::from_settings(self.llm()?, &self.settings)))
    }

    /// The narrative is optional, so a missing key only disables it.
    fn report_generator(&mut self, analyzer: Analyzer) -> ReportGenerator {
        let llm = match self.llm() {
            Ok(llm) => Some(llm),
            Err(e) => {
                tracing::info!(reason = %e, "Report narrative disabled");
                None
            }
        };
        ReportGenerator::from_settings(analyzer, llm, &self.settings)
    }
}

fn optional_window(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    category: Option<Category>,
) -> EntryFilter {
    EntryFilter {
        start: from,
        end: to,
        category,
    }
}

fn format_entry(entry: &Entry) -> String {
    let metrics: Vec<String> = entry
        .metrics
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    let mut line = format!(
        "#{:<4} {} {:<8} {} {}",
        entry.id,
        entry.timestamp.format("%Y-%m-%d %H:%M"),
        entry.category,
        entry.mood.emoji(),
        metrics.join(" ")
    );
    if let Some(note) = &entry.note {
        line.push_str(&format!("  ({note})"));
    }
    line
}
