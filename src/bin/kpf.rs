use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kira_kmer_prefilter::*;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// K-mer prefilter: build tables and compare them.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the encoded target index `<prefix>.{kmers,ids,meta}` from FASTA/FASTQ
    TargetIndex {
        /// Target sequences (FASTA/FASTQ, optionally gzipped)
        #[arg(short, long)]
        input: PathBuf,
        /// Output prefix
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        table: TableArgs,
    },
    /// Build the sorted query table `<path>` (+ `<path>.meta`) from FASTA/FASTQ
    QueryTable {
        /// Query sequences (FASTA/FASTQ, optionally gzipped)
        #[arg(short, long)]
        input: PathBuf,
        /// Output table path
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        table: TableArgs,
    },
    /// Compare a query table against a target index and write grouped hits
    Compare {
        /// Query table written by `query-table`
        #[arg(short, long)]
        query: PathBuf,
        /// Target index prefix written by `target-index`
        #[arg(short, long)]
        target: PathBuf,
        /// Result database (`<path>` + `<path>.index`)
        #[arg(short, long)]
        output: PathBuf,
        /// Worker threads
        #[arg(long)]
        threads: Option<usize>,
    },
}

#[derive(Args, Debug)]
struct TableArgs {
    /// K-mer length
    #[arg(short = 'k', long, default_value_t = 9)]
    k: usize,

    /// Nucleotide alphabet (ACGT) instead of amino acids
    #[arg(long, default_value_t = false)]
    nucleotide: bool,

    /// Worker threads
    #[arg(long)]
    threads: Option<usize>,

    /// Fail on entries without identifier instead of skipping them
    #[arg(long, default_value_t = false)]
    require_ids: bool,
}

impl TableArgs {
    fn builder(&self) -> Result<TableBuilder> {
        let alphabet = if self.nucleotide {
            AlphabetKind::Nucleotide
        } else {
            AlphabetKind::AminoAcid
        };
        let mut cfg = TableConfig::default()
            .k(self.k)
            .alphabet(alphabet)
            .require_identifiers(self.require_ids);
        if let Some(t) = self.threads {
            cfg = cfg.threads(t);
        }
        TableBuilder::new(cfg)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::TargetIndex { input, output, table } => {
            let builder = table.builder()?;
            let targets = SequenceSet::from_fastx(&input, builder.config().identifiers_required())
                .with_context(|| format!("reading targets from {}", input.display()))?;
            let (_, enc) = create_target_index(&builder, &targets, &output)?;
            info!(
                "Target index {} ready: {} unique k-mers",
                output.display(),
                enc.unique_kmers
            );
        }
        Command::QueryTable { input, output, table } => {
            let builder = table.builder()?;
            let queries = SequenceSet::from_fastx(&input, builder.config().identifiers_required())
                .with_context(|| format!("reading queries from {}", input.display()))?;
            let stats = create_query_table(&builder, &queries, &output)?;
            info!(
                "Query table {} ready: {} records",
                output.display(),
                stats.records
            );
        }
        Command::Compare {
            query,
            target,
            output,
            threads,
        } => {
            if threads == Some(0) {
                anyhow::bail!("--threads must be > 0");
            }
            let mut writer = HitDbWriter::create(&output)?;
            let stats = compare_tables(&query, &target, &mut writer, threads)?;
            info!(
                "Kept {} of {} records in {} (query, target) pairs",
                stats.filter.kept_records, stats.filter.records, stats.filter.kept_pairs
            );
        }
    }
    Ok(())
}
