//! # docshelf CLI (`dsh`)
//!
//! The `dsh` binary is the operator's interface to docshelf: database
//! initialization, file ingestion, document library queries, user account
//! management, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! dsh --config ./config/docshelf.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dsh init` | Create the SQLite database and run schema migrations |
//! | `dsh ingest <file> --title …` | Run the full ingestion pipeline on a file |
//! | `dsh docs list` | List all documents |
//! | `dsh docs get <id>` | Show one document with its relations |
//! | `dsh docs search "<query>"` | Case-insensitive keyword search |
//! | `dsh docs delete <id>` | Hard-delete a document |
//! | `dsh users add <username> <email> <password>` | Create a user account |
//! | `dsh users list` | List accounts |
//! | `dsh users delete <id> --actor <id>` | Delete an account (never your own) |
//! | `dsh serve` | Start the HTTP JSON API |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use docshelf::cache::{CacheCoordinator, QueryCache};
use docshelf::config;
use docshelf::ingest::{AttachTarget, IngestPipeline, IngestRequest};
use docshelf::models::Role;
use docshelf::store::{build_store, detect_mime, FileUpload};
use docshelf::validate::DocumentForm;
use docshelf::{db, migrate, relations, repo, server, users};

/// docshelf CLI — a document-management ingestion service.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docshelf.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dsh",
    about = "docshelf — document ingestion, archival metadata, and relations",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docshelf.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// files, document_relations, users). Idempotent — running it multiple
    /// times is safe.
    Init,

    /// Ingest a file with its metadata form.
    ///
    /// Runs the full pipeline: validation, hashing, object-store upload,
    /// document persistence, optional relation linking, cache invalidation.
    Ingest {
        /// Path to the file to ingest.
        file: PathBuf,

        /// Document title (required by validation).
        #[arg(long)]
        title: String,

        /// Document description (required by validation).
        #[arg(long, default_value = "")]
        description: String,

        /// Document type, e.g. `decree`, `report` (required by validation).
        #[arg(long = "type")]
        document_type: String,

        /// Issuing organ (required by validation).
        #[arg(long)]
        issuing_organ: String,

        /// Responsible party (required by validation).
        #[arg(long)]
        responsible: String,

        /// Subject (required by validation).
        #[arg(long)]
        subject: String,

        /// Confidentiality level.
        #[arg(long)]
        confidentiality: Option<String>,

        /// Legal basis.
        #[arg(long)]
        legal_basis: Option<String>,

        /// Document date (YYYY-MM-DD).
        #[arg(long)]
        date: Option<String>,

        /// Comma-separated tags.
        #[arg(long, default_value = "")]
        tags: String,

        /// Author name.
        #[arg(long)]
        author: Option<String>,

        /// Attach the new document to this parent document id.
        #[arg(long)]
        parent: Option<i64>,

        /// Relation type for the attach flow (defaults from config).
        #[arg(long)]
        relation_type: Option<String>,

        /// Recorded as the relation's creator.
        #[arg(long)]
        created_by: Option<String>,

        /// Override the MIME type detected from the file extension.
        #[arg(long)]
        mime: Option<String>,
    },

    /// Query and manage the document library.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Manage user accounts.
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },

    /// Start the HTTP JSON API.
    Serve,
}

#[derive(Subcommand)]
enum DocsAction {
    /// List all documents, newest first.
    List,
    /// Show one document with its relations.
    Get { id: i64 },
    /// Case-insensitive keyword search over title, description, and tags.
    Search {
        query: String,
        /// Restrict to a category (documents, images, videos, audio, other).
        #[arg(long)]
        category: Option<String>,
    },
    /// Hard-delete a document and its relations.
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum UsersAction {
    /// Create a user account.
    Add {
        username: String,
        email: String,
        password: String,
        /// Grant the admin role.
        #[arg(long)]
        admin: bool,
    },
    /// List accounts.
    List,
    /// Delete an account. Refuses to delete the acting account itself.
    Delete {
        /// The account to delete.
        id: i64,
        /// The account performing the deletion.
        #[arg(long)]
        actor: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }

        Commands::Ingest {
            file,
            title,
            description,
            document_type,
            issuing_organ,
            responsible,
            subject,
            confidentiality,
            legal_basis,
            date,
            tags,
            author,
            parent,
            relation_type,
            created_by,
            mime,
        } => {
            let pool = db::connect(&cfg).await?;
            migrate::apply_schema(&pool).await?;

            let store = build_store(&cfg.storage)?;
            let cache = Arc::new(QueryCache::new());
            let coordinator = Arc::new(CacheCoordinator::new(cache, cfg.cache.clone()));
            let pipeline = IngestPipeline::new(
                pool,
                store,
                coordinator,
                cfg.ingest.clone(),
                cfg.storage.clone(),
            );

            let original_name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "upload".to_string());
            let bytes = std::fs::read(&file)
                .map_err(|e| anyhow::anyhow!("cannot read {}: {}", file.display(), e))?;
            let mime_type = mime.unwrap_or_else(|| detect_mime(&original_name));

            let form = DocumentForm {
                title,
                description,
                document_type,
                issuing_organ,
                responsible,
                subject,
                confidentiality,
                legal_basis,
                document_date: date,
                tags: tags
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect(),
                author,
                category: None,
            };

            let request = IngestRequest {
                form,
                file: FileUpload {
                    original_name,
                    mime_type,
                    bytes,
                },
                attach_to: parent.map(|parent_id| AttachTarget {
                    parent_id,
                    relation_type,
                    description: None,
                    created_by,
                }),
            };

            match pipeline.run(request).await {
                Ok(outcome) => {
                    println!("ingest ok");
                    println!("  document id: {}", outcome.document.id);
                    println!("  title:       {}", outcome.document.title);
                    println!("  category:    {}", outcome.document.category);
                    println!("  object:      {}", outcome.stored.file_path);
                    println!("  hash:        {}", outcome.content_hash);
                    if let Some(ref rel) = outcome.relation {
                        println!(
                            "  relation:    {} -> {} ({})",
                            rel.parent_document_id, rel.child_document_id, rel.relation_type
                        );
                    }
                    for warning in &outcome.warnings {
                        println!("  warning:     {}", warning);
                    }
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Docs { action } => {
            let pool = db::connect(&cfg).await?;
            migrate::apply_schema(&pool).await?;

            match action {
                DocsAction::List => {
                    let docs = repo::list_documents(&pool).await?;
                    print_document_table(&docs);
                }
                DocsAction::Get { id } => {
                    let doc = repo::get_document(&pool, id).await?;
                    println!("--- Document ---");
                    println!("id:          {}", doc.id);
                    println!("title:       {}", doc.title);
                    if let Some(ref d) = doc.description {
                        println!("description: {}", d);
                    }
                    println!("category:    {}", doc.category);
                    if let Some(ref a) = doc.author {
                        println!("author:      {}", a);
                    }
                    if !doc.tags.is_empty() {
                        println!("tags:        {}", doc.tags.join(", "));
                    }
                    println!("created_at:  {}", doc.created_at.format("%Y-%m-%dT%H:%M:%SZ"));
                    if let Some(ref meta) = doc.meta {
                        if let Some(ref digital_id) = meta.digital_id {
                            println!("digital id:  {}", digital_id);
                        }
                        if let Some(ref info) = meta.file_info {
                            println!("file:        {} ({} bytes, {})", info.path, info.size, info.mime_type);
                            println!("hash:        {}", info.content_hash);
                        }
                    }

                    let rels = relations::list_related(&pool, id).await?;
                    println!();
                    println!("--- Relations ({}) ---", rels.len());
                    for rel in &rels {
                        println!(
                            "{} -> {} ({}){}",
                            rel.parent_document_id,
                            rel.child_document_id,
                            rel.relation_type,
                            rel.description
                                .as_deref()
                                .map(|d| format!(" — {}", d))
                                .unwrap_or_default()
                        );
                    }
                }
                DocsAction::Search { query, category } => {
                    let docs = repo::search_documents(&pool, &query, category.as_deref()).await?;
                    if docs.is_empty() {
                        println!("No results.");
                    } else {
                        print_document_table(&docs);
                    }
                }
                DocsAction::Delete { id } => {
                    repo::delete_document(&pool, id).await?;
                    println!("Deleted document {}.", id);
                }
            }
        }

        Commands::Users { action } => {
            let pool = db::connect(&cfg).await?;
            migrate::apply_schema(&pool).await?;

            match action {
                UsersAction::Add {
                    username,
                    email,
                    password,
                    admin,
                } => {
                    let role = if admin { Role::Admin } else { Role::User };
                    let user = users::create_user(&pool, &username, &email, &password, role).await?;
                    println!("Created {} ({}) with role {}.", user.username, user.email, user.role.as_str());
                }
                UsersAction::List => {
                    let all = users::list_users(&pool).await?;
                    for user in &all {
                        println!("{:>4}  {:<20} {:<30} {}", user.id, user.username, user.email, user.role.as_str());
                    }
                }
                UsersAction::Delete { id, actor } => {
                    users::delete_user(&pool, actor, id).await?;
                    println!("Deleted user {}.", id);
                }
            }
        }

        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn print_document_table(docs: &[docshelf::models::Document]) {
    for doc in docs {
        println!(
            "{:>4}  {:<10} {:<40} {}",
            doc.id,
            doc.category,
            truncate(&doc.title, 40),
            doc.created_at.format("%Y-%m-%d")
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
