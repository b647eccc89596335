use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clap::Parser;
use clap_derive::Parser;
use dis_chat::chat::chat_config::ChatConfig;
use dis_chat::chat::chat_listener::ChatListener;
use dis_chat::chat::chat_message::ChatMessage;
use dis_chat::chat::chat_session::ChatSession;
use dis_chat::chat::user_roster::{render_roster, UserRecord};
use dis_chat::dis::entity_id::EntityId;
use dis_chat::messaging::transport::TransportError;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::select;
use tracing::{error, info, Level};

/// exit code when the encoder produced a frame it must not send
const EXIT_MALFORMED_FRAME: i32 = 2;

#[derive(Parser)]
struct Args {
    /// this participant's entity id, site:application:entity
    sender_id: EntityId,
    name: String,

    #[clap(long, default_value_t = ChatConfig::default_group_addr())]
    group: SocketAddr,

    #[clap(long, default_value = "0:0:0")]
    receiver_id: EntityId,

    #[clap(long, default_value_t = 1)]
    exercise_id: u8,

    #[clap(long, default_value_t = 1)]
    ttl: u32,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

/// Prints chat traffic to stdout
struct TerminalListener {
    num_known_users: AtomicUsize,
}

impl ChatListener for TerminalListener {
    fn on_message_received(&self, message: &ChatMessage) {
        println!("{}", message);
    }

    fn on_roster_changed(&self, users: &[UserRecord]) {
        let previously_known = self.num_known_users.swap(users.len(), Ordering::AcqRel);
        for user in users.iter().skip(previously_known) {
            println!("*** {} joined", user);
        }
    }

    fn on_transport_error(&self, error: &TransportError) {
        if error.is_fatal() {
            error!("stopping: {}", error);
            std::process::exit(EXIT_MALFORMED_FRAME);
        }
        println!("*** {}", error);
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_thread_ids(true)
        .try_init()
        .ok();

    let mut config = ChatConfig::new(args.group, args.sender_id, &args.name);
    config.receiver_id = args.receiver_id;
    config.exercise_id = args.exercise_id;
    config.multicast_ttl = args.ttl;

    let socket_opener = Arc::new(config.socket_opener());
    let listener = Arc::new(TerminalListener { num_known_users: AtomicUsize::new(0) });
    let session = ChatSession::new(config, listener, socket_opener)?;

    session.connect().await?;
    info!("chatting as {} ({}) on {} - /users lists participants, /quit exits", args.sender_id, args.name, session.group_addr());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                match line.trim() {
                    "/quit" => break,
                    "/users" => print!("{}", render_roster(&session.roster().await)),
                    "/stats" => println!("    {:?}", session.receive_stats()),
                    _ => {
                        session.submit_outgoing(&line).await;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.disconnect().await;
    Ok(())
}
