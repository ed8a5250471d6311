//! `enleve` command-line front-end.
//!
//! Every subcommand maps onto one screen action. Notices are printed to
//! stderr, results to stdout as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use enleve_client::admin::AdminUsers;
use enleve_client::board::Board;
use enleve_client::commands::auth;
use enleve_client::config::ClientConfig;
use enleve_client::dashboard::Dashboard;
use enleve_client::events::{Notice, NoticeLevel, Notifier};
use enleve_client::live::{BoardFeed, DashboardFeed};
use enleve_client::profile::{AvatarUpload, ProfileScreen};
use enleve_client::session::Access;
use enleve_client::Client;
use enleve_shared::backend::RecordStore;
use enleve_shared::models::ChatMessage;
use enleve_shared::types::{AttendanceId, AttendanceStatus, Channel, Role, UserId};
use enleve_store::NewAttendance;

#[derive(Parser)]
#[command(name = "enleve", version, about = "ENLEVE CRM lead board")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the three board columns
    Board,
    /// Take a lead from the automated or waiting column
    Claim { id: i64 },
    /// Close a lead
    Finalize { id: i64 },
    /// Print the assistant's report for a lead
    Report { id: i64 },
    /// Print the automated conversation behind a lead
    History { id: i64 },
    /// Show dashboard metrics
    Dashboard,
    /// Follow a screen and print it on every change
    Watch {
        #[arg(value_enum)]
        screen: WatchedScreen,
    },
    /// Show or edit the signed-in profile
    Profile {
        /// New display name
        #[arg(long)]
        name: Option<String>,
    },
    /// Upload a new profile picture
    Avatar { file: PathBuf },
    /// Invite a user (admins only)
    Invite { email: String, role: String },
    /// Sign in and print the session
    SignIn { email: String, password: String },
    /// Create a broker account
    SignUp {
        email: String,
        password: String,
        name: String,
    },
    /// Record a lead in the local store
    Ingest {
        #[arg(long, default_value = "whatsapp")]
        channel: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        contact: String,
        /// Put the lead straight into the waiting queue
        #[arg(long)]
        waiting: bool,
        #[arg(long)]
        report: Option<String>,
    },
    /// Move an automated lead to the waiting queue (local store)
    Escalate { id: i64 },
    /// Register a broker at the end of the queue (local store)
    Enroll {
        name: String,
        #[arg(long)]
        admin: bool,
    },
    /// Fill the local store with demo data
    Seed,
}

#[derive(Clone, Copy, ValueEnum)]
enum WatchedScreen {
    Board,
    Dashboard,
}

/// Prints notices to stderr.
struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, notice: Notice) {
        let tag = match notice.level {
            NoticeLevel::Success => "ok",
            NoticeLevel::Info => "info",
            NoticeLevel::Error => "error",
        };
        match notice.description {
            Some(description) => eprintln!("[{tag}] {}: {description}", notice.title),
            None => eprintln!("[{tag}] {}", notice.title),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    enleve_client::init_tracing();
    let cli = Cli::parse();

    let config = ClientConfig::from_env();
    let client = Client::connect(&config, Arc::new(StderrNotifier)).await?;
    let state = client.state.clone();

    if !matches!(cli.command, Command::SignIn { .. } | Command::SignUp { .. }) {
        client.sign_in_from_config(&config).await?;
    }

    match cli.command {
        Command::Board => print_json(&Board::new(state).load().await?)?,

        Command::Claim { id } => {
            let id = AttendanceId(id);
            let board = Board::new(state.clone());
            let current = state.backend().get_attendance(id).await?;
            let outcome = match current.status {
                AttendanceStatus::EmEspera => board.claim_waiting(id).await?,
                _ => board.claim_automated(id).await?,
            };
            print_json(&outcome)?;
        }

        Command::Finalize { id } => {
            print_json(&Board::new(state).finalize(AttendanceId(id)).await?)?
        }

        Command::Report { id } => match Board::new(state).report_text(AttendanceId(id)).await? {
            Some(report) => println!("{report}"),
            None => println!("(sem relatório)"),
        },

        Command::History { id } => {
            for entry in Board::new(state).chat_history(AttendanceId(id)).await? {
                let who = if entry.message.is_customer() { "cliente" } else { "ia" };
                println!("{who}: {}", entry.message.content);
            }
        }

        Command::Dashboard => print_json(&Dashboard::new(state).load().await?)?,

        Command::Watch { screen } => {
            let backend = state.backend.clone();
            match screen {
                WatchedScreen::Board => {
                    let mut feed =
                        BoardFeed::board(Arc::new(Board::new(state)), backend.as_ref()).await?;
                    loop {
                        tokio::select! {
                            next = feed.changed() => match next {
                                Some(snapshot) => print_json(&snapshot)?,
                                None => break,
                            },
                            _ = tokio::signal::ctrl_c() => break,
                        }
                    }
                }
                WatchedScreen::Dashboard => {
                    let mut feed =
                        DashboardFeed::dashboard(Arc::new(Dashboard::new(state)), backend.as_ref())
                            .await?;
                    loop {
                        tokio::select! {
                            next = feed.changed() => match next {
                                Some(snapshot) => print_json(&snapshot)?,
                                None => break,
                            },
                            _ = tokio::signal::ctrl_c() => break,
                        }
                    }
                }
            }
        }

        Command::Profile { name } => {
            let screen = ProfileScreen::new(state);
            if let Some(name) = name {
                screen.update_display_name(&name).await?;
            }
            print_json(&screen.load().await?)?;
        }

        Command::Avatar { file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let upload = AvatarUpload {
                file_name: file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("avatar")
                    .to_string(),
                content_type: content_type_for(&file).to_string(),
                bytes: Bytes::from(bytes),
            };
            print_json(&ProfileScreen::new(state).upload_avatar(upload).await?)?;
        }

        Command::Invite { email, role } => {
            let screen = AdminUsers::new(state);
            if let Access::Allow(_) = screen.open().await? {
                print_json(&screen.invite(&email, &role).await?)?;
            } else {
                bail!("admin access required");
            }
        }

        Command::SignIn { email, password } => {
            let session =
                auth::sign_in(&state, client.password_auth()?, &email, &password).await?;
            println!("{} {:?}", session.user_id(), session.roles);
        }

        Command::SignUp {
            email,
            password,
            name,
        } => auth::sign_up(&state, client.password_auth()?, &email, &password, &name).await?,

        Command::Ingest {
            channel,
            name,
            contact,
            waiting,
            report,
        } => {
            let channel = Channel::from(channel.to_ascii_lowercase());
            let mut new = if waiting {
                NewAttendance::waiting(channel, &name, &contact)
            } else {
                NewAttendance::automated(channel, &name, &contact)
            };
            if let Some(report) = report {
                new = new.report(&report);
            }
            print_json(&client.local()?.ingest(new).await?)?;
        }

        Command::Escalate { id } => {
            match client.local()?.escalate_to_queue(AttendanceId(id)).await? {
                Some(attendance) => print_json(&attendance)?,
                None => bail!("lead {id} is not in the automated column"),
            }
        }

        Command::Enroll { name, admin } => {
            let local = client.local()?;
            let profile = local.enroll_broker(UserId::new(), &name).await?;
            if admin {
                local.grant_role(profile.id, Role::Admin).await?;
            }
            print_json(&profile)?;
        }

        Command::Seed => seed(&client).await?,
    }

    Ok(())
}

async fn seed(client: &Client) -> anyhow::Result<()> {
    let local = client.local()?;

    let admin = local.enroll_broker(UserId::new(), "Ana Admin").await?;
    local.grant_role(admin.id, Role::Admin).await?;
    let bruno = local.enroll_broker(UserId::new(), "Bruno Corretor").await?;
    let carla = local.enroll_broker(UserId::new(), "Carla Corretora").await?;

    local
        .ingest(
            NewAttendance::automated(Channel::WhatsApp, "Marcos Lima", "+55 41 98888-1111")
                .session("wa-marcos"),
        )
        .await?;
    for (sender, content) in [
        ("human", "Oi, procuro um apartamento no Batel"),
        ("ai", "Claro! Quantos quartos você precisa?"),
        ("human", "Três quartos"),
    ] {
        local
            .append_chat_message(
                "wa-marcos",
                &ChatMessage {
                    sender: sender.into(),
                    content: content.into(),
                },
            )
            .await?;
    }
    local
        .ingest(NewAttendance::automated(
            Channel::Instagram,
            "Juliana Rocha",
            "@juliana.rocha",
        ))
        .await?;
    let waiting = local
        .ingest(
            NewAttendance::waiting(Channel::WhatsApp, "Pedro Alves", "+55 41 97777-2222")
                .report("Cliente busca casa com 3 quartos no Centro, até R$ 800 mil."),
        )
        .await?;
    local
        .add_preference(waiting.id, "bairro", Some("Centro"), None)
        .await?;
    local
        .add_preference(waiting.id, "quartos", None, Some(3.0))
        .await?;

    info!(
        admin = %admin.id,
        brokers = 3,
        "local store seeded"
    );
    println!("admin  {}", admin.id);
    println!("broker {}", bruno.id);
    println!("broker {}", carla.id);
    println!("set ENLEVE_LOCAL_USER to one of these ids to act as that user");
    Ok(())
}
