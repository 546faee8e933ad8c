mod capture;
mod config;
mod view;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use config::Config;
use presence_api::models::{
    AttendanceStatus, HistoryQuery, LogAttendanceRequest, SignupRequest, StatsQuery, UserQuery,
    UserUpdate,
};
use presence_api::{ApiClient, ApiError, FaceRecognition, FaceRegistration, SessionStore};
use presence_core::{CaptureWizard, FeedbackDetail, Identity, Role};
use presence_hw::{Camera, V4lSource};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "presence", about = "Face-recognition attendance client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and remember the session
    Login {
        #[arg(short, long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Create an account
    Signup {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: Option<String>,
        #[arg(short, long, default_value = "student")]
        role: Role,
    },
    /// Forget the stored session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Today's attendance and 30-day statistics
    Dashboard,
    /// Attendance records over a date range
    History {
        #[arg(short, long)]
        user: Option<String>,
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Record attendance by hand
    Log {
        #[arg(short, long)]
        user: String,
        #[arg(short, long, default_value = "present")]
        status: AttendanceStatus,
        #[arg(short, long)]
        confidence: Option<f32>,
    },
    /// Manage users
    Users {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Face registration and recognition
    Face {
        #[command(subcommand)]
        command: FaceCommands,
    },
    /// List video capture devices
    Devices,
}

#[derive(Subcommand)]
enum UserCommands {
    /// List users
    List {
        #[arg(short, long)]
        role: Option<Role>,
        /// Include deactivated users
        #[arg(short, long)]
        all: bool,
    },
    /// Show one user
    Show { id: String },
    /// Change a user's name, role or active flag
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        role: Option<Role>,
        #[arg(long)]
        active: Option<bool>,
    },
}

#[derive(Subcommand)]
enum FaceCommands {
    /// Show face registration progress for a user
    Status { user: Option<String> },
    /// Capture face samples for a user (interactive unless --images is given)
    Enroll {
        /// Target user id (defaults to yourself)
        #[arg(short, long)]
        user: Option<String>,
        /// Submit all samples as one batch after capturing --images
        #[arg(short, long)]
        batch: bool,
        /// Image files to capture instead of using the camera
        #[arg(short, long, num_args = 1..)]
        images: Vec<PathBuf>,
    },
    /// Identify a face and log attendance
    Recognize {
        /// Image file to use instead of the camera
        #[arg(short, long)]
        image: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<ApiError>() {
                Some(ApiError::Unauthorized) => {
                    eprintln!("Not logged in or session expired. Run `presence login`.")
                }
                Some(api) => eprintln!("error: {}", api.user_message()),
                None => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<()> {
    let config = Config::load()?;
    let session = Arc::new(SessionStore::open(&config.session_path));
    let client = ApiClient::new(&config.api_url, config.request_timeout(), session.clone())?;

    match command {
        Commands::Login { email, password } => {
            let password = password_or_prompt(password)?;
            let user = client.login(&email, &password).await?;
            println!("Logged in as {} ({})", user.name, user.role);
        }
        Commands::Signup {
            name,
            email,
            password,
            role,
        } => {
            let password = password_or_prompt(password)?;
            let response = client
                .register(&SignupRequest {
                    name,
                    email,
                    password,
                    role,
                })
                .await?;
            if response.message.is_empty() {
                println!("Account created.");
            } else {
                println!("{}", response.message);
            }
            if session.current().is_none() {
                println!("Run `presence login` to continue.");
            }
        }
        Commands::Logout => {
            client.logout()?;
            println!("Logged out.");
        }
        Commands::Whoami => {
            let user = client.me().await?;
            print!("{}", view::identity(&user));
        }
        Commands::Dashboard => {
            let me = current_user(&session)?;
            let stats_query = StatsQuery {
                user_id: (me.role == Role::Student).then(|| me.id.clone()),
                ..StatsQuery::default()
            };
            let (today, stats) = tokio::try_join!(
                client.attendance_today(),
                client.attendance_stats(&stats_query)
            )?;
            print!("{}", view::dashboard(&today, &stats));
        }
        Commands::History { user, from, to } => {
            let me = current_user(&session)?;
            if let (Some(from), Some(to)) = (from, to) {
                if from > to {
                    bail!("--from ({from}) is after --to ({to})");
                }
            }
            // Students only ever see their own records.
            let user_id = match me.role {
                Role::Student => Some(me.id),
                _ => user,
            };
            let records = client
                .attendance_history(&HistoryQuery {
                    user_id,
                    start_date: from,
                    end_date: to,
                })
                .await?;
            print!("{}", view::records(&records));
        }
        Commands::Log {
            user,
            status,
            confidence,
        } => {
            let response = client
                .log_attendance(&LogAttendanceRequest {
                    user_id: user,
                    status,
                    confidence,
                })
                .await?;
            println!("{}", response.message);
            print!("{}", view::records(&[response.attendance]));
        }
        Commands::Users { command } => users(&client, command).await?,
        Commands::Face { command } => face(&client, &session, &config, command).await?,
        Commands::Devices => {
            let devices = tokio::task::spawn_blocking(Camera::list_devices).await?;
            print!("{}", view::devices(&devices));
        }
    }
    Ok(())
}

async fn users(client: &ApiClient, command: UserCommands) -> Result<()> {
    match command {
        UserCommands::List { role, all } => {
            let users = client
                .list_users(&UserQuery {
                    role,
                    active_only: !all,
                })
                .await?;
            print!("{}", view::users(&users));
        }
        UserCommands::Show { id } => {
            let user = client.get_user(&id).await?;
            print!("{}", view::identity(&user));
        }
        UserCommands::Update {
            id,
            name,
            role,
            active,
        } => {
            let user = client
                .update_user(
                    &id,
                    &UserUpdate {
                        name,
                        role,
                        is_active: active,
                    },
                )
                .await?;
            println!("Updated {} ({}).\n", user.name, user.id);
            // Refresh the table once so the change is visible in context.
            let users = client
                .list_users(&UserQuery {
                    role: None,
                    active_only: false,
                })
                .await?;
            print!("{}", view::users(&users));
        }
    }
    Ok(())
}

async fn face(
    client: &ApiClient,
    session: &SessionStore,
    config: &Config,
    command: FaceCommands,
) -> Result<()> {
    match command {
        FaceCommands::Status { user } => {
            let user_id = match user {
                Some(id) => id,
                None => current_user(session)?.id,
            };
            let status = client.registration_status(&user_id).await?;
            print!("{}", view::registration_status(&status));
        }
        FaceCommands::Enroll {
            user,
            batch,
            images,
        } => {
            let target = user.or_else(|| session.identity().map(|me| me.id));
            let handler = Arc::new(FaceRegistration::new(client.clone(), target.clone()));
            if let Some(target) = &target {
                println!("Registering face for user {target}");
            }

            if images.is_empty() {
                let wizard = CaptureWizard::new(config.wizard_config(), handler)?
                    .with_camera(Box::new(camera(config)));
                if let Err(err) = wizard.toggle_camera().await {
                    eprintln!("{} Use `u <path>` to capture files.", err.user_message());
                }
                capture::interactive(&wizard).await?;
            } else {
                let wizard = CaptureWizard::new(config.wizard_config(), handler)?;
                capture::from_files(&wizard, &images, batch).await?;
            }

            if let Some(target) = &target {
                if let Ok(status) = client.registration_status(target).await {
                    print!("{}", view::registration_status(&status));
                }
            }
        }
        FaceCommands::Recognize { image } => {
            let handler = Arc::new(FaceRecognition::new(client.clone()));
            let captured = match image {
                Some(path) => {
                    let wizard = CaptureWizard::new(config.wizard_config(), handler)?;
                    wizard.capture_file(&path).await
                }
                None => {
                    let wizard = CaptureWizard::new(config.wizard_config(), handler)?
                        .with_camera(Box::new(camera(config)));
                    wizard.toggle_camera().await?;
                    wizard.capture_from_camera().await
                }
            };
            let captured = match captured {
                Ok(captured) => captured,
                Err(err) => bail!(err.user_message()),
            };
            match &captured.feedback.detail {
                FeedbackDetail::Recognition { identity: None, .. } => {
                    bail!(captured.feedback.message.clone())
                }
                _ => print!("{}", view::feedback(&captured.feedback)),
            }
        }
    }
    Ok(())
}

fn camera(config: &Config) -> V4lSource {
    V4lSource::new(config.camera_device.clone(), config.stream_settings())
}

fn current_user(session: &SessionStore) -> Result<Identity> {
    session
        .identity()
        .ok_or(ApiError::Unauthorized)
        .context("no stored session")
}

fn password_or_prompt(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    eprint!("Password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("password must not be empty");
    }
    Ok(password)
}
