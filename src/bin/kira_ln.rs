use std::io::{self, Write};
use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use kira_lab_notebook::api::{ExperimentScope, NotebookClient, NotebookHttpClient};
use kira_lab_notebook::app::{App, Startup};
use kira_lab_notebook::config::ConfigLoader;
use kira_lab_notebook::domain::{
    Credentials, ExperimentDraft, ExperimentId, ExperimentStatus, FileId, FileUpload, Group,
    GroupCode, GroupId, LogEntry, ProfileUpdate, Registration, User,
};
use kira_lab_notebook::error::KiraError;
use kira_lab_notebook::output::{
    DeleteSummary, JsonOutput, LoadSummary, OutputMode, TextOutput, human_size,
};
use kira_lab_notebook::session::SessionState;
use kira_lab_notebook::store::{AssumeYes, DeleteOutcome};
use kira_lab_notebook::views::{ExperimentFilter, owners};

const EMAIL_ENV: &str = "KIRA_LN_EMAIL";
const PASSWORD_ENV: &str = "KIRA_LN_PASSWORD";

#[derive(Parser)]
#[command(name = "kira-ln")]
#[command(about = "Command-line client for the Kira lab notebook")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// A line typed into the interactive shell.
#[derive(Parser)]
#[command(name = "kira-ln", no_binary_name = true, disable_version_flag = true)]
struct ShellLine {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create an account and sign in")]
    Register(RegisterArgs),
    #[command(about = "Sign in")]
    Login(LoginArgs),
    #[command(about = "Sign out and clear local state")]
    Logout,
    #[command(about = "Show the signed-in user and active group")]
    Whoami,
    #[command(about = "Update name, email or password")]
    Profile(ProfileArgs),
    #[command(about = "Manage research groups")]
    Groups(GroupsArgs),
    #[command(about = "List experiments")]
    List(ListArgs),
    #[command(about = "Show status counts and recent activity")]
    Dashboard,
    #[command(about = "Open an experiment")]
    Show(IdArgs),
    #[command(about = "Create an experiment")]
    New(NewArgs),
    #[command(about = "Change an experiment's status")]
    Status(StatusArgs),
    #[command(about = "Edit title, hypothesis or protocol")]
    Edit(EditArgs),
    #[command(about = "Save the analysis text")]
    Analysis(AnalysisArgs),
    #[command(about = "Append a log entry")]
    Log(LogArgs),
    #[command(about = "Attach a file")]
    Attach(AttachArgs),
    #[command(about = "Remove an attached file")]
    Detach(FileArgs),
    #[command(about = "Download an attached file")]
    Download(DownloadArgs),
    #[command(about = "Delete an experiment")]
    Delete(DeleteArgs),
    #[command(about = "Reload owned and group experiments")]
    Reload,
}

impl Commands {
    fn signs_in(&self) -> bool {
        matches!(self, Commands::Register(_) | Commands::Login(_))
    }
}

#[derive(Args)]
struct RegisterArgs {
    #[arg(long)]
    email: String,

    #[arg(long)]
    name: String,

    #[arg(long)]
    password: Option<String>,
}

#[derive(Args)]
struct LoginArgs {
    #[arg(long)]
    email: String,

    #[arg(long)]
    password: Option<String>,
}

#[derive(Args)]
struct ProfileArgs {
    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    email: Option<String>,

    #[arg(long)]
    password: Option<String>,
}

#[derive(Args)]
struct GroupsArgs {
    #[command(subcommand)]
    command: Option<GroupsCommand>,
}

#[derive(Subcommand)]
enum GroupsCommand {
    #[command(about = "List your groups")]
    List,
    #[command(about = "Create a group and make it active")]
    Create {
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
    },
    #[command(about = "Join a group by code")]
    Join { code: String },
    #[command(about = "Leave a group")]
    Leave { id: GroupId },
    #[command(about = "Make a group active")]
    Select { id: GroupId },
    #[command(about = "List members of the active group")]
    Members,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long, value_enum, default_value_t = ExperimentScope::User)]
    scope: ExperimentScope,

    #[arg(long)]
    search: Option<String>,

    #[arg(long, value_enum)]
    status: Option<ExperimentStatus>,

    #[arg(long)]
    owner: Option<String>,
}

#[derive(Args)]
struct IdArgs {
    id: String,
}

#[derive(Args)]
struct NewArgs {
    title: String,

    #[arg(long)]
    hypothesis: String,

    #[arg(long)]
    protocol: Option<String>,

    #[arg(long)]
    id: Option<String>,
}

#[derive(Args)]
struct StatusArgs {
    id: String,

    #[arg(value_enum)]
    status: ExperimentStatus,
}

#[derive(Args)]
struct EditArgs {
    id: String,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    hypothesis: Option<String>,

    #[arg(long)]
    protocol: Option<String>,
}

#[derive(Args)]
struct AnalysisArgs {
    id: String,

    #[arg(required = true, num_args = 1..)]
    text: Vec<String>,
}

#[derive(Args)]
struct LogArgs {
    id: String,

    #[arg(required = true, num_args = 1..)]
    content: Vec<String>,
}

#[derive(Args)]
struct AttachArgs {
    id: String,
    path: String,
}

#[derive(Args)]
struct FileArgs {
    id: String,
    file_id: FileId,
}

#[derive(Args)]
struct DownloadArgs {
    id: String,
    file_id: FileId,

    #[arg(long)]
    output: Option<String>,
}

#[derive(Args)]
struct DeleteArgs {
    id: String,

    #[arg(long)]
    yes: bool,
}

#[derive(Serialize)]
struct SignedIn<'a> {
    user: &'a User,
    load: LoadSummary,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupChangeSummary<'a> {
    group: Option<&'a Group>,
    current_group: Option<&'a Group>,
    reload: LoadSummary,
}

#[derive(Serialize)]
struct Downloaded {
    path: String,
    bytes: u64,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::NotFound(_) | KiraError::Auth(_) | KiraError::Forbidden(_) => 2,
        KiraError::Connection(_) | KiraError::Server { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let client = NotebookHttpClient::new(&config)?;
    tracing::debug!(base_url = client.base_url(), "using notebook server");
    let app = App::new(client);
    let startup = app.start();

    match cli.command {
        Some(command) => {
            if !command.signs_in() && !startup.session.is_authenticated() {
                sign_in_from_env(&app)?;
            }
            execute(&app, command, output_mode)
        }
        None => match output_mode {
            OutputMode::Interactive => run_shell(&app, &startup),
            OutputMode::NonInteractive => Err(miette::Report::msg(
                "command required (try `kira-ln --help`)",
            )),
        },
    }
}

/// One-shot invocations start with an empty cookie jar, so they sign in from
/// the environment when credentials are provided there.
fn sign_in_from_env<C: NotebookClient>(app: &App<C>) -> miette::Result<()> {
    let (Ok(email), Ok(password)) = (std::env::var(EMAIL_ENV), std::env::var(PASSWORD_ENV))
    else {
        return Ok(());
    };
    let (user, _) = app.login(&Credentials::new(email, password))?;
    tracing::debug!(user = %user.email, "signed in from environment");
    Ok(())
}

fn run_shell<C: NotebookClient>(app: &App<C>, startup: &Startup) -> miette::Result<()> {
    match &startup.session {
        SessionState::Authenticated(session) => {
            println!("signed in as {}", TextOutput::user(&session.user));
            if let Some(load) = &startup.load {
                println!("{}", TextOutput::load(&LoadSummary::from(load)));
            }
        }
        SessionState::Unauthenticated => {
            println!("not signed in; try `login --email <EMAIL>` or `register`");
        }
    }
    println!("type `help` for commands, `exit` to quit");

    loop {
        print!("kira-ln> ");
        io::stdout().flush().into_diagnostic()?;
        let mut line = String::new();
        if io::stdin().read_line(&mut line).into_diagnostic()? == 0 {
            println!();
            break Ok(());
        }

        let mut words = match split_line(&line) {
            Ok(words) => words,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };
        if words.first().is_some_and(|word| word == "kira-ln") {
            words.remove(0);
        }
        match words.first().map(String::as_str) {
            None => continue,
            Some("exit" | "quit") => break Ok(()),
            Some(_) => {}
        }

        let parsed = match ShellLine::try_parse_from(&words) {
            Ok(parsed) => parsed,
            Err(err) => {
                let _ = err.print();
                continue;
            }
        };
        if let Err(report) = execute(app, parsed.command, OutputMode::Interactive) {
            eprintln!("{report:?}");
        }
    }
}

fn execute<C: NotebookClient>(
    app: &App<C>,
    command: Commands,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match command {
        Commands::Register(args) => {
            let password = password_or_prompt(args.password)?;
            let registration = Registration {
                email: args.email,
                password,
                name: args.name,
            };
            let (user, load) = app.register(&registration)?;
            emit_signed_in(output_mode, &user, LoadSummary::from(&load))
        }
        Commands::Login(args) => {
            let password = password_or_prompt(args.password)?;
            let (user, load) = app.login(&Credentials::new(args.email, password))?;
            emit_signed_in(output_mode, &user, LoadSummary::from(&load))
        }
        Commands::Logout => {
            app.logout();
            emit(output_mode, &serde_json::json!({ "loggedOut": true }), || {
                "signed out".to_string()
            })
        }
        Commands::Whoami => {
            let context = app.session().context();
            let Some(user) = &context.user else {
                return Err(KiraError::Auth("Not authenticated".to_string()).into());
            };
            emit(output_mode, &context, || {
                let group = context
                    .current_group
                    .as_ref()
                    .map(|group| format!("{} ({})", group.name, group.code))
                    .unwrap_or_else(|| "none".to_string());
                format!("{}\nactive group: {group}", TextOutput::user(user))
            })
        }
        Commands::Profile(args) => {
            let update = ProfileUpdate {
                name: args.name,
                email: args.email,
                password: args.password,
            };
            let user = app.session().update_profile(&update)?;
            emit(output_mode, &user, || {
                format!("profile updated: {}", TextOutput::user(&user))
            })
        }
        Commands::Groups(args) => {
            let command = args.command.unwrap_or(GroupsCommand::List);
            run_groups(app, command, output_mode)
        }
        Commands::List(args) => {
            let experiments = match args.scope {
                ExperimentScope::User => app.store().owned(),
                ExperimentScope::Group => app.store().group_visible(),
            };
            let filter = ExperimentFilter {
                search: args.search,
                status: args.status,
                owner: args.owner,
            };
            let hits = filter.apply(&experiments);
            emit(output_mode, &hits, || {
                if hits.is_empty() {
                    return "No experiments found".to_string();
                }
                let mut lines: Vec<String> =
                    hits.iter().map(|exp| TextOutput::experiment_row(exp)).collect();
                if args.scope == ExperimentScope::Group {
                    lines.push(format!("owners: {}", owners(&experiments).join(", ")));
                }
                lines.join("\n")
            })
        }
        Commands::Dashboard => {
            let view = app.dashboard();
            emit(output_mode, &view, || TextOutput::dashboard(&view))
        }
        Commands::Show(args) => {
            let id: ExperimentId = args.id.parse()?;
            let exp = app.store().select_id(&id)?;
            emit(output_mode, &exp, || TextOutput::experiment_detail(&exp))
        }
        Commands::New(args) => {
            let mut draft = ExperimentDraft::new(args.title, args.hypothesis)
                .with_protocol(args.protocol.unwrap_or_default());
            if let Some(id) = args.id {
                draft = draft.with_id(id.parse()?);
            }
            let exp = app.store().create(&draft)?;
            emit(output_mode, &exp, || format!("created {}", exp.id))
        }
        Commands::Status(args) => {
            let id: ExperimentId = args.id.parse()?;
            let exp = app.store().set_status(&id, args.status)?;
            emit(output_mode, &exp, || format!("{} is now {}", exp.id, exp.status))
        }
        Commands::Edit(args) => {
            let id: ExperimentId = args.id.parse()?;
            let exp = app
                .store()
                .edit_fields(&id, args.title, args.hypothesis, args.protocol)?;
            emit(output_mode, &exp, || format!("updated {}", exp.id))
        }
        Commands::Analysis(args) => {
            let id: ExperimentId = args.id.parse()?;
            let exp = app.store().save_analysis(&id, &args.text.join(" "))?;
            emit(output_mode, &exp, || format!("analysis saved for {}", exp.id))
        }
        Commands::Log(args) => {
            let id: ExperimentId = args.id.parse()?;
            let exp = app
                .store()
                .append_log(&id, LogEntry::now(args.content.join(" ")))?;
            emit(output_mode, &exp, || {
                let stamp = exp
                    .last_log()
                    .map(|log| log.timestamp.clone())
                    .unwrap_or_default();
                format!("log added to {} at {stamp}", exp.id)
            })
        }
        Commands::Attach(args) => {
            let id: ExperimentId = args.id.parse()?;
            let upload = FileUpload::from_path(Utf8Path::new(&args.path))?;
            let exp = app.store().attach_file(&id, &upload)?;
            emit(output_mode, &exp, || {
                format!("attached {} to {}", upload.filename, exp.id)
            })
        }
        Commands::Detach(args) => {
            let id: ExperimentId = args.id.parse()?;
            let exp = app.store().detach_file(&id, args.file_id)?;
            emit(output_mode, &exp, || {
                format!("removed file {} from {}", args.file_id, exp.id)
            })
        }
        Commands::Download(args) => {
            let id: ExperimentId = args.id.parse()?;
            let path = download_destination(app, &id, args.file_id, args.output)?;
            let bytes = app.store().download_file(&id, args.file_id, &path)?;
            let downloaded = Downloaded {
                path: path.into_string(),
                bytes,
            };
            emit(output_mode, &downloaded, || {
                format!(
                    "saved {} ({})",
                    downloaded.path,
                    human_size(downloaded.bytes)
                )
            })
        }
        Commands::Delete(args) => {
            let id: ExperimentId = args.id.parse()?;
            let outcome = if args.yes {
                app.store().delete(&id, &AssumeYes)?
            } else {
                match output_mode {
                    OutputMode::Interactive => app.store().delete(&id, &prompt_confirm)?,
                    OutputMode::NonInteractive => app.store().delete(&id, &|_: &str| false)?,
                }
            };
            emit(output_mode, &DeleteSummary::from(outcome), || match outcome {
                DeleteOutcome::Declined => "delete cancelled".to_string(),
                DeleteOutcome::Deleted { navigate_home: true } => {
                    format!("deleted {id}; back to the dashboard")
                }
                DeleteOutcome::Deleted { navigate_home: false } => format!("deleted {id}"),
            })
        }
        Commands::Reload => {
            let summary = LoadSummary::from(&app.reload());
            emit(output_mode, &summary, || TextOutput::load(&summary))
        }
    }
}

fn run_groups<C: NotebookClient>(
    app: &App<C>,
    command: GroupsCommand,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let groups = app.groups();
    match command {
        GroupsCommand::List => {
            let list = groups.list_groups()?;
            let active = app.session().current_group().map(|group| group.id);
            emit(output_mode, &list, || {
                if list.is_empty() {
                    return "You are not a member of any group".to_string();
                }
                list.iter()
                    .map(|group| TextOutput::group(group, Some(group.id) == active))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        GroupsCommand::Create { name } => {
            let change = groups.create_group(&name.join(" "))?;
            emit_group_change(
                output_mode,
                Some(&change.value),
                change.current_group.as_ref(),
                LoadSummary::from(&change.reload),
            )
        }
        GroupsCommand::Join { code } => {
            let code: GroupCode = code.parse()?;
            let change = groups.join_group(&code)?;
            emit_group_change(
                output_mode,
                change.value.as_ref(),
                change.current_group.as_ref(),
                LoadSummary::from(&change.reload),
            )
        }
        GroupsCommand::Leave { id } => {
            let change = groups.leave_group(id)?;
            emit_group_change(
                output_mode,
                None,
                change.current_group.as_ref(),
                LoadSummary::from(&change.reload),
            )
        }
        GroupsCommand::Select { id } => {
            let change = groups.select_active_group(id)?;
            emit_group_change(
                output_mode,
                None,
                change.current_group.as_ref(),
                LoadSummary::from(&change.reload),
            )
        }
        GroupsCommand::Members => {
            let members = groups.members()?;
            emit(output_mode, &members, || {
                members
                    .iter()
                    .map(TextOutput::member)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
    }
}

fn download_destination<C: NotebookClient>(
    app: &App<C>,
    id: &ExperimentId,
    file_id: FileId,
    output: Option<String>,
) -> Result<Utf8PathBuf, KiraError> {
    if let Some(output) = output {
        return Ok(Utf8PathBuf::from(output));
    }
    let record = match app.store().get(id) {
        Some(record) => record,
        None => app.store().select_id(id)?,
    };
    record
        .files
        .iter()
        .find(|file| file.id == file_id)
        .and_then(|file| Utf8Path::new(&file.filename).file_name())
        .map(Utf8PathBuf::from)
        .ok_or_else(|| KiraError::NotFound(format!("File {file_id} not found on experiment {id}")))
}

fn emit<T: Serialize + ?Sized>(
    output_mode: OutputMode,
    value: &T,
    text: impl FnOnce() -> String,
) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print(value).into_diagnostic(),
        OutputMode::Interactive => {
            println!("{}", text());
            Ok(())
        }
    }
}

fn emit_signed_in(output_mode: OutputMode, user: &User, load: LoadSummary) -> miette::Result<()> {
    let text = format!(
        "signed in as {}\n{}",
        TextOutput::user(user),
        TextOutput::load(&load)
    );
    emit(output_mode, &SignedIn { user, load }, || text)
}

fn emit_group_change(
    output_mode: OutputMode,
    group: Option<&Group>,
    current_group: Option<&Group>,
    reload: LoadSummary,
) -> miette::Result<()> {
    let mut text = String::new();
    if let Some(group) = group {
        text.push_str(&format!("{} (code {})\n", group.name, group.code));
    }
    match current_group {
        Some(current) => text.push_str(&format!("active group: {}\n", current.name)),
        None => text.push_str("no active group\n"),
    }
    text.push_str(&TextOutput::load(&reload));
    let summary = GroupChangeSummary {
        group,
        current_group,
        reload,
    };
    emit(output_mode, &summary, || text)
}

fn password_or_prompt(password: Option<String>) -> miette::Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    eprint!("password: ");
    io::stderr().flush().into_diagnostic()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line).into_diagnostic()?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn prompt_confirm(prompt: &str) -> bool {
    eprint!("{prompt} [y/N] ");
    if io::stderr().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Splits a shell line on whitespace, keeping single- or double-quoted text
/// together.
fn split_line(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for ch in line.chars() {
        match quote {
            Some(open) if ch == open => quote = None,
            Some(_) => current.push(ch),
            None if ch == '"' || ch == '\'' => {
                quote = Some(ch);
                in_word = true;
            }
            None if ch.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(ch);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        return Err("unterminated quote".to_string());
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}
