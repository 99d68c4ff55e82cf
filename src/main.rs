use clap::Parser;
use log::{error, info, warn};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::watch;

use chatter::Error;
use chatter::api::auth::{AuthProvider, Identity, PasswordAuth, StaticAuth};
use chatter::api::client::RestStore;
use chatter::api::memory::MemoryStore;
use chatter::api::store::RealtimeStore;
use chatter::app::AppConfig;
use chatter::reconciler::{ListChange, Reconciler};
use chatter::session::{Session, SessionSettings};
use chatter::storage::{Cache, CachingSurface};
use chatter::ui::Surface;
use chatter::ui::chat_view::ChatView;
use chatter::ui::sidebar::Sidebar;
use chatter::utils::{conversation_key, presence_key};

#[derive(Parser, Debug)]
#[command(name = "chatter", version, about = "A minimal real-time chat client")]
struct Cli {
    /// Config file; defaults to chatter.toml in the user config directory.
    #[arg(long, env = "CHATTER_CONFIG")]
    config: Option<PathBuf>,

    /// Use an in-process store instead of the hosted backend.
    #[arg(long)]
    local: bool,

    /// Display name for --local.
    #[arg(long, default_value = "guest")]
    name: String,

    /// Neither read nor write the message cache.
    #[arg(long)]
    no_cache: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    To(&'a str),
    WhoAmI,
    Quit,
    Say(&'a str),
    Unknown(&'a str),
    Empty,
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line);
    };
    let (name, arg) = rest.split_once(' ').map(|(n, a)| (n, a.trim())).unwrap_or((rest, ""));
    match name {
        "to" if !arg.is_empty() => Command::To(arg),
        "whoami" => Command::WhoAmI,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(line),
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let config = AppConfig::load(cli.config.as_deref())?;

    let (auth, store): (Box<dyn AuthProvider>, Arc<dyn RealtimeStore>) = if cli.local {
        let identity = Identity {
            display_name: cli.name.clone(),
            photo_url: None,
            uid: format!("local-{}", presence_key(&cli.name)),
        };
        (Box::new(StaticAuth::new(identity)), Arc::new(MemoryStore::new()))
    } else {
        config.validate()?;
        (
            Box::new(PasswordAuth::from_config(&config)?),
            Arc::new(RestStore::new(&config.database_url)?),
        )
    };
    tokio::spawn(log_auth_state(auth.state()));

    let settings = SessionSettings::from(&config);
    let mut session = Session::sign_in(auth.as_ref(), store, settings).await?;
    session.watch_users(Sidebar::new(io::stdout())).await?;
    println!(
        "Signed in as {} ({}). Commands: /to <uid>, /whoami, /quit",
        session.identity().display_name,
        session.identity().uid
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut listening = true;
    while let Some(line) = next_input(&mut lines, &mut interrupt, &mut listening).await? {
        match parse_command(&line) {
            Command::Empty => {}
            Command::Quit => break,
            Command::WhoAmI => {
                let me = session.identity();
                println!("{} ({})", me.display_name, me.uid);
            }
            Command::To(uid) => {
                let opened = open_conversation(&mut session, uid, settings, !cli.no_cache).await;
                if let Err(e) = opened {
                    warn!("could not open conversation with {uid}: {e}");
                }
            }
            Command::Say(text) => {
                if let Err(e) = session.send_message(text).await {
                    warn!("message not sent: {e}");
                }
            }
            Command::Unknown(cmd) => println!("unknown command: {cmd}"),
        }
    }

    session.sign_out(auth.as_ref()).await?;
    Ok(())
}

/// Next input line, or `None` once input ends or Ctrl-C arrives.
async fn next_input<R, F>(
    lines: &mut Lines<R>,
    interrupt: &mut Pin<&mut F>,
    listening: &mut bool,
) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = io::Result<()>>,
{
    loop {
        tokio::select! {
            biased;
            res = interrupt.as_mut(), if *listening => match res {
                Ok(()) => {
                    info!("[session] interrupted");
                    return Ok(None);
                }
                Err(e) => {
                    warn!("cannot listen for Ctrl-C: {e}");
                    *listening = false;
                }
            },
            line = lines.next_line() => return line,
        }
    }
}

async fn open_conversation(
    session: &mut Session,
    uid: &str,
    settings: SessionSettings,
    use_cache: bool,
) -> Result<(), Error> {
    let mut view = ChatView::new(io::stdout(), format!("chat with {uid}"));
    if !use_cache {
        session.select_recipient(uid, view).await?;
        return Ok(());
    }

    let cache = match Cache::open_default() {
        Ok(cache) => cache,
        Err(e) => {
            warn!("[cache] unavailable, continuing without it: {e}");
            session.select_recipient(uid, view).await?;
            return Ok(());
        }
    };
    let scope = conversation_key(&session.identity().uid, uid);
    let mut seeded = Reconciler::new();
    match cache.entries(&scope, settings.message_limit) {
        Ok(entries) => {
            let restored = seeded.restore(entries);
            info!("[cache] restored {restored} messages for {scope}");
            for (index, entry) in seeded.entries().iter().enumerate() {
                view.apply(&ListChange::Inserted {
                    index,
                    entry: entry.clone(),
                });
            }
        }
        Err(e) => warn!("[cache] could not read {scope}: {e}"),
    }
    session
        .select_recipient_with(uid, seeded, CachingSurface::new(cache, scope, view))
        .await?;
    Ok(())
}

async fn log_auth_state(mut state: watch::Receiver<Option<Identity>>) {
    while state.changed().await.is_ok() {
        match state.borrow_and_update().as_ref() {
            Some(identity) => info!("[auth] signed in: {}", identity.display_name),
            None => info!("[auth] signed out"),
        }
    }
}
