//! ---
//! hmeta_section: "07-cli"
//! hmeta_subsection: "binary"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Control CLI for syncing, sharding, and auditing permission metadata."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use hmeta_common::{init_tracing, HmetaConfig, MetadataPaths};
use hmeta_orchestrator::{parse_slash_list, GroupBy, MetadataWorkspace};
use tracing::debug;

mod commands;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Permission metadata tooling for the GraphQL gateway",
    long_about = None
)]
struct Cli {
    /// Configuration file (overrides the default search; `HMETA_CONFIG` wins over both).
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Answer database introspection from a YAML snapshot instead of Postgres.
    #[arg(long = "db-snapshot", value_name = "FILE", env = "HMETA_DB_SNAPSHOT", global = true)]
    db_snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sync shards, deployed documents and test mappings for slash-delimited roles.
    SyncRoles {
        #[arg(value_name = "ROLES")]
        roles: String,
    },
    /// Delete every permission artifact of slash-delimited roles.
    DeleteRoles {
        #[arg(value_name = "ROLES")]
        roles: String,
    },
    /// Add relationships from hasura_relationships_metadata.txt and scaffold their tests.
    CreateRelationships,
    /// Rebuild deployed table documents from the shards.
    Reconstruct {
        /// Replace deployed documents that already exist.
        #[arg(
            short = 'o',
            long,
            value_parser = BoolishValueParser::new(),
            action = ArgAction::Set,
            required = true
        )]
        overwrite: bool,
    },
    /// Split deployed table documents into shards.
    Shard {
        /// Delete every shard first so shards of removed roles do not linger.
        #[arg(
            short = 'r',
            long,
            value_parser = BoolishValueParser::new(),
            action = ArgAction::Set,
            default_value = "true"
        )]
        refresh: bool,
    },
    /// Write BigQuery mirror metadata for one role.
    CreateBqMetadata {
        role: String,
        project: String,
        /// `-o` alone means true.
        #[arg(
            short = 'o',
            long,
            value_parser = BoolishValueParser::new(),
            action = ArgAction::Set,
            num_args = 0..=1,
            default_value = "false",
            default_missing_value = "true"
        )]
        overwrite: bool,
    },
    /// Apply metadata_deprecations.yaml to relationships, role shards and supersets.
    Deprecate,
    /// Write every manual relationship to tooling/metadata_relationships.yaml.
    ExportRelationships,
    /// Print the exported relationships grouped by origin or remote table.
    ListRelationships {
        #[arg(long, value_enum, default_value_t = RelationshipSide::Origin)]
        by: RelationshipSide,
        /// Only show this grouping table.
        #[arg(short = 'f', long)]
        filter: Option<String>,
    },
    /// Restrict a relationship e2e query to rows whose relationship is not null.
    AddNotNullFilter {
        /// Query file, relative to the relationship e2e directory.
        #[arg(value_name = "QUERY")]
        query: PathBuf,
    },
    /// Map roles to the positive (or, with --negative, negative) e2e scenarios of tables.
    UpdateE2eMapping {
        #[arg(value_name = "ROLES")]
        roles: String,
        #[arg(value_name = "TABLES")]
        tables: String,
        #[arg(long)]
        negative: bool,
    },
    /// Remove repeated entries from the e2e mapping.
    DedupeE2eMapping,
    /// Print which roles inherit each superset and which roles share a superset list.
    ListSupersets,
    /// Diff each role's shards against its resolved prescription.
    CompareRoleToPrescription {
        #[arg(value_name = "ROLES")]
        roles: String,
    },
    /// Diff two supersets from the catalog.
    CompareSupersets { first: String, second: String },
    /// Diff the shards of two roles.
    CompareRoles { first: String, second: String },
    /// Set allow_aggregations on every shard of an active role.
    UpdateAllowAgg {
        role: String,
        #[arg(long = "to-true", value_parser = BoolishValueParser::new(), action = ArgAction::Set)]
        to_true: bool,
    },
    /// Make default permission fields explicit in every role shard.
    NormalizeShards,
    /// Report roles declared twice in deployed documents (slash-delimited tables, empty for all).
    CheckDuplicates {
        #[arg(value_name = "TABLES", default_value = "")]
        tables: String,
    },
    /// Report granted tables and columns missing from the database.
    CheckDbConsistency,
    /// Report API-exposed tables that are empty or missing from the database.
    CheckApiTables {
        /// Resume the audit at this table.
        #[arg(short = 't', long = "start-table")]
        start_table: Option<String>,
    },
    /// Check deployed permissions against domain_rules.yaml.
    CheckDomainRules,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RelationshipSide {
    Origin,
    Remote,
}

impl From<RelationshipSide> for GroupBy {
    fn from(side: RelationshipSide) -> Self {
        match side {
            RelationshipSide::Origin => GroupBy::Origin,
            RelationshipSide::Remote => GroupBy::Remote,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("hmeta.toml"));
    candidates.push(PathBuf::from("configs/hmeta.toml"));

    let loaded = HmetaConfig::load_with_source(&candidates)?;
    init_tracing("hmetactl", &loaded.config.logging)?;
    match &loaded.source {
        Some(path) => debug!(config = %path.display(), "configuration loaded"),
        None => debug!("running with built-in configuration defaults"),
    }

    let paths = MetadataPaths::from_config(&loaded.config.paths).context("resolving metadata paths")?;
    let workspace = MetadataWorkspace::new(loaded.config, paths);
    let db = commands::DbSource::new(cli.db_snapshot);

    match cli.command {
        Commands::SyncRoles { roles } => commands::sync_roles(&workspace, &parse_slash_list(&roles), &db),
        Commands::DeleteRoles { roles } => commands::delete_roles(&workspace, &parse_slash_list(&roles)),
        Commands::CreateRelationships => commands::create_relationships(&workspace),
        Commands::Reconstruct { overwrite } => commands::reconstruct(&workspace, overwrite),
        Commands::Shard { refresh } => commands::shard(&workspace, refresh),
        Commands::CreateBqMetadata {
            role,
            project,
            overwrite,
        } => commands::create_bq_metadata(&workspace, &role.to_lowercase(), &project, overwrite),
        Commands::CompareRoleToPrescription { roles } => {
            commands::compare_role_to_prescription(&workspace, &parse_slash_list(&roles))
        }
        Commands::CompareSupersets { first, second } => commands::compare_supersets(&workspace, &first, &second),
        Commands::CompareRoles { first, second } => {
            commands::compare_roles(&workspace, &first.to_lowercase(), &second.to_lowercase())
        }
        Commands::UpdateAllowAgg { role, to_true } => {
            commands::update_allow_agg(&workspace, &role.to_lowercase(), to_true)
        }
        Commands::NormalizeShards => commands::normalize_shards(&workspace),
        Commands::CheckDuplicates { tables } => commands::check_duplicates(&workspace, &parse_slash_list(&tables)),
        Commands::CheckDbConsistency => commands::check_db_consistency(&workspace, &db),
        Commands::CheckApiTables { start_table } => {
            commands::check_api_tables(&workspace, &db, start_table.map(|table| table.to_lowercase()).as_deref())
        }
        Commands::CheckDomainRules => commands::check_domain_rules(&workspace),
        Commands::Deprecate => commands::deprecate(&workspace),
        Commands::ExportRelationships => commands::export_relationships(&workspace),
        Commands::ListRelationships { by, filter } => {
            commands::list_relationships(&workspace, by.into(), filter.as_deref())
        }
        Commands::AddNotNullFilter { query } => commands::add_not_null_filter(&workspace, &query),
        Commands::UpdateE2eMapping {
            roles,
            tables,
            negative,
        } => commands::update_e2e_mapping(
            &workspace,
            &parse_slash_list(&roles),
            &parse_slash_list(&tables),
            negative,
        ),
        Commands::DedupeE2eMapping => commands::dedupe_e2e_mapping(&workspace),
        Commands::ListSupersets => commands::list_supersets(&workspace),
    }
}
