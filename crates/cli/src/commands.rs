use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Load a job configuration and report every validation error
    Validate {
        #[arg(long, help = "Job config file path (JSON)")]
        config: String,
    },
    /// Run a job until every shard item completes or Ctrl+C stops it
    Migrate {
        #[arg(long, help = "Job config file path (JSON)")]
        config: String,
    },
    /// List the jobs known to the state store
    Jobs,
    Status {
        #[arg(long, help = "Job ID to inspect")]
        job: String,

        #[arg(
            long,
            help = "If set, prints the job status as JSON instead of a table"
        )]
        json: bool,
    },
    /// Compare source and target tables and persist the result
    Check {
        #[arg(long, help = "Job config file path (JSON)")]
        config: String,

        #[arg(long, help = "If set, prints the check result as JSON")]
        json: bool,
    },
    Commit {
        #[arg(long, help = "Job config file path (JSON)")]
        config: String,
    },
    Rollback {
        #[arg(long, help = "Job config file path (JSON)")]
        config: String,
    },
}
