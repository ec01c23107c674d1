use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use escape_room_engine::api::{NewGame, NewPlayer, StaffSession, VenueClient};
use escape_room_engine::credentials::{CredentialVault, Slot};
use escape_shared_types::team_name::validate_team_name;
use escape_shared_types::{
    ClientToServer, CreateGameReq, Heartbeat, HintDecision, HintRequestReq, InteractReq, RoomMap, SensorReq, ServerToClient,
    StartGameReq, TicketPayload,
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing_subscriber::EnvFilter;

mod controller;

use controller::RoomClient;

#[derive(Parser)]
#[command(name = "staff", version, about = "Front-desk and game-master tools for an escape room venue")]
struct Cli {
    /// Venue REST backend.
    #[arg(long, global = true, env = "VENUE_API_URL", default_value = "http://localhost:3000")]
    api: String,
    /// Room controller of the room being run.
    #[arg(long, global = true, env = "CONTROLLER_URL", default_value = "http://localhost:8080")]
    controller: String,
    /// Where signed-in sessions are kept between runs.
    #[arg(long, global = true, env = "STAFF_STATE_DIR", default_value = ".staff")]
    state_dir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Admin sign-in with email and password.
    Signin {
        email: String,
        #[arg(long, env = "STAFF_PASSWORD")]
        password: String,
    },
    /// Front-desk sign-in with the venue access code.
    AccessCode { code: String },
    /// Forget stored sessions (both unless one is named).
    Logout {
        #[arg(long)]
        admin: bool,
        #[arg(long)]
        company: bool,
    },
    /// Show a company (defaults to the signed-in one).
    Company { id: Option<String> },
    /// List a company's rooms (defaults to the signed-in one).
    Rooms { company_id: Option<String> },
    /// Check in a team from a decoded ticket QR payload and start their game.
    Scan {
        /// QR payload, e.g. {"bookingId":"b-1","roomId":"tomb","teamName":"Raiders"}
        payload: String,
        #[arg(long)]
        team: Option<String>,
        /// Player as `Name` or `Name:email`; repeat for each player.
        #[arg(long = "player")]
        players: Vec<String>,
        /// Countdown override in seconds.
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Current game and countdown.
    Status,
    /// Flip a piece as if a player touched it.
    Interact {
        puzzle: String,
        stage: String,
        piece: String,
        #[arg(long)]
        off: bool,
    },
    /// Override a sensor.
    Sensor {
        name: String,
        #[arg(long)]
        off: bool,
        #[arg(long)]
        actor: Option<String>,
    },
    Hints {
        #[command(subcommand)]
        command: HintCommand,
    },
    /// Reset one puzzle, or the whole room between games.
    Reset {
        #[arg(long)]
        puzzle: Option<String>,
    },
    /// Follow the live room until the session ends.
    Watch {
        /// Approve every hint request as it arrives.
        #[arg(long)]
        auto_approve: bool,
    },
}

#[derive(Subcommand)]
enum HintCommand {
    List,
    Request {
        puzzle: String,
        stage: String,
        #[arg(long)]
        player: Option<String>,
    },
    Approve { id: String },
    Decline { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let vault = CredentialVault::new(&cli.state_dir);
    let venue = VenueClient::new(&cli.api);
    let room = RoomClient::new(&cli.controller);

    match cli.command {
        Commands::Signin { email, password } => {
            let session = venue.sign_in(&email, &password).await.context("admin sign-in")?;
            vault.save(Slot::Admin, &session)?;
            println!("signed in as admin {}", who(&session));
        }
        Commands::AccessCode { code } => {
            let session = venue.access_code(&code).await.context("access code sign-in")?;
            vault.save(Slot::Company, &session)?;
            println!("front desk signed in for company {}", session.claims.company_id.as_deref().unwrap_or("?"));
        }
        Commands::Logout { admin, company } => {
            let both = !admin && !company;
            if admin || both {
                vault.clear(Slot::Admin)?;
            }
            if company || both {
                vault.clear(Slot::Company)?;
            }
            println!("signed out");
        }
        Commands::Company { id } => {
            let session = any_session(&vault)?;
            let id = company_id(&session, id)?;
            print_json(&venue.company(&session, &id).await?)?;
        }
        Commands::Rooms { company_id: id } => {
            let session = any_session(&vault)?;
            let id = company_id(&session, id)?;
            print_json(&venue.company_rooms(&session, &id).await?)?;
        }
        Commands::Scan { payload, team, players, duration } => {
            let session = vault
                .restore()
                .company
                .ok_or_else(|| anyhow!("front desk is not signed in; run `staff access-code` first"))?;
            scan(&venue, &room, &session, &payload, team, &players, duration).await?;
        }
        Commands::Status => {
            println!("{}", summarize(&room.map().await?));
            let status = room.game().await?;
            let remaining = status.remaining_secs.map(|s| format!(", {}:{:02} left", s / 60, s % 60)).unwrap_or_default();
            println!("{} ({}){remaining}", status.game.team_name, status.phase);
        }
        Commands::Interact { puzzle, stage, piece, off } => {
            let req = InteractReq { puzzle_id: puzzle, stage_id: stage, piece_id: piece, interacted: !off };
            room.interact(&req).await?;
        }
        Commands::Sensor { name, off, actor } => {
            room.sensor(&name, &SensorReq { active: !off, player_id: actor }).await?;
        }
        Commands::Hints { command } => hints(&room, command).await?,
        Commands::Reset { puzzle } => {
            let report = match puzzle {
                Some(puzzle) => room.reset_puzzle(&puzzle).await?,
                None => room.reset_all().await?,
            };
            println!("reset: {} writes, {} failed", report.writes, report.failures);
            if !report.ok {
                bail!("reset incomplete");
            }
        }
        Commands::Watch { auto_approve } => watch(&room, auto_approve).await?,
    }
    Ok(())
}

fn who(session: &StaffSession) -> &str {
    let claims = &session.claims;
    claims.name.as_deref().or(claims.email.as_deref()).or(claims.id.as_deref()).unwrap_or("?")
}

/// Admin session if present, else the front desk one.
fn any_session(vault: &CredentialVault) -> Result<StaffSession> {
    let restored = vault.restore();
    restored.admin.or(restored.company).ok_or_else(|| anyhow!("not signed in"))
}

fn company_id(session: &StaffSession, explicit: Option<String>) -> Result<String> {
    explicit
        .or_else(|| session.claims.company_id.clone())
        .ok_or_else(|| anyhow!("no company id given and the session carries none"))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `Name` or `Name:email`.
fn parse_player(raw: &str) -> Result<(String, Option<String>)> {
    let (name, email) = match raw.split_once(':') {
        Some((name, email)) => (name.trim(), Some(email.trim().to_string()).filter(|e| !e.is_empty())),
        None => (raw.trim(), None),
    };
    if name.is_empty() {
        bail!("player `{raw}` has no name");
    }
    Ok((name.to_string(), email))
}

fn parse_ticket(payload: &str) -> Result<TicketPayload> {
    serde_json::from_str(payload).context("ticket QR payload is not a booking")
}

async fn scan(
    venue: &VenueClient,
    room: &RoomClient,
    session: &StaffSession,
    payload: &str,
    team: Option<String>,
    players: &[String],
    duration: Option<u64>,
) -> Result<()> {
    let ticket = parse_ticket(payload)?;
    let team = team
        .or(ticket.team_name.clone())
        .ok_or_else(|| anyhow!("ticket carries no team name; pass --team"))?;
    let team_name = validate_team_name(&team).with_context(|| format!("team name `{team}`"))?;
    let players = players.iter().map(|p| parse_player(p)).collect::<Result<Vec<_>>>()?;

    let game = venue
        .create_game(
            session,
            &NewGame { team_name: team_name.clone(), room_id: ticket.room_id.clone(), booking_id: ticket.booking_id.clone() },
        )
        .await
        .context("registering the game with the venue")?;
    let game_id = game
        .get("id")
        .or_else(|| game.get("_id"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("venue returned a game without an id"))?
        .to_string();
    for (name, email) in players {
        venue
            .create_player(session, &NewPlayer { game_id: game_id.clone(), name: name.clone(), email })
            .await
            .with_context(|| format!("adding player {name}"))?;
    }

    room.create_game(&CreateGameReq { team_name, room_id: ticket.room_id, booking_id: ticket.booking_id }).await?;
    let status = room.start_game(&StartGameReq { duration_secs: duration }).await?;
    tracing::info!(venue_game = %game_id, room_game = %status.game_id, "team checked in");
    println!(
        "{} started in {} ({}s on the clock)",
        status.game.team_name,
        status.game.room_id,
        status.remaining_secs.unwrap_or_default()
    );
    Ok(())
}

async fn hints(room: &RoomClient, command: HintCommand) -> Result<()> {
    match command {
        HintCommand::List => {
            for request in room.pending_hints().await? {
                println!(
                    "{}  {}/{}  {}",
                    request["requestId"].as_str().unwrap_or("?"),
                    request["puzzleId"].as_str().unwrap_or("?"),
                    request["stageId"].as_str().unwrap_or("?"),
                    request["playerId"].as_str().unwrap_or("-"),
                );
            }
        }
        HintCommand::Request { puzzle, stage, player } => {
            let filed = room.request_hint(&HintRequestReq { puzzle_id: puzzle, stage_id: stage, player_id: player }).await?;
            println!("{}", filed["requestId"].as_str().unwrap_or("?"));
        }
        HintCommand::Approve { id } => {
            room.resolve_hint(&id, true).await?;
        }
        HintCommand::Decline { id } => {
            room.resolve_hint(&id, false).await?;
        }
    }
    Ok(())
}

fn summarize(map: &RoomMap) -> String {
    let solved = map.puzzles.values().filter(|p| p.solved).count();
    let active: Vec<&str> = map.sensors.iter().filter(|(_, s)| s.active).map(|(name, _)| name.as_str()).collect();
    let pending = escape_room_engine::hints::pending(map).len();
    format!("{solved}/{} puzzles solved, sensors on: [{}], hints waiting: {pending}", map.puzzles.len(), active.join(", "))
}

/// Pending requests not yet approved from this feed. A request stays pending
/// in the map until the approval lands, so later frames must not resend it.
fn unsent_approvals(map: &RoomMap, sent: &mut HashSet<String>) -> Vec<String> {
    escape_room_engine::hints::pending(map)
        .into_iter()
        .filter(|(id, _)| sent.insert(id.to_string()))
        .map(|(id, _)| id.to_string())
        .collect()
}

async fn watch(room: &RoomClient, auto_approve: bool) -> Result<()> {
    let url = room.feed_url();
    let (mut ws, _resp) = connect_async(url.as_str()).await.with_context(|| format!("connecting to {url}"))?;
    let idle = Duration::from_secs(30);
    let mut approved = HashSet::new();
    loop {
        let msg = match timeout(idle, ws.next()).await {
            Ok(Some(msg)) => msg.context("ws error frame")?,
            Ok(None) => bail!("room closed the feed"),
            Err(_) => {
                let beat = serde_json::to_string(&ClientToServer::Heartbeat(Heartbeat {}))?;
                ws.send(Message::Text(beat)).await.context("heartbeat failed")?;
                continue;
            }
        };
        let Message::Text(txt) = msg else { continue };
        match serde_json::from_str::<ServerToClient>(&txt) {
            Ok(ServerToClient::Map(map)) => {
                println!("{}", summarize(&map));
                if auto_approve {
                    for id in unsent_approvals(&map, &mut approved) {
                        let approve = ClientToServer::ApproveHint(HintDecision { request_id: id });
                        ws.send(Message::Text(serde_json::to_string(&approve)?)).await?;
                    }
                }
            }
            Ok(ServerToClient::HintResolved(resolved)) => println!("hint {} {:?}", resolved.request_id, resolved.state),
            Ok(ServerToClient::SessionEnded(ended)) => {
                println!("game {} ended: {:?}", ended.game_id, ended.outcome);
                let _ = ws.send(Message::Close(None)).await;
                return Ok(());
            }
            Ok(ServerToClient::Error(err)) if err.code != "OK" => eprintln!("room: {} {}", err.code, err.msg),
            Ok(ServerToClient::Error(_)) => {}
            Err(err) => tracing::warn!(%err, "unreadable room message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn players_with_and_without_email() {
        assert_eq!(parse_player("Ada").unwrap(), ("Ada".to_string(), None));
        assert_eq!(parse_player(" Ada : ada@example.com").unwrap(), ("Ada".to_string(), Some("ada@example.com".to_string())));
        assert_eq!(parse_player("Ada:").unwrap(), ("Ada".to_string(), None));
        assert!(parse_player(":x@example.com").is_err());
    }

    #[test]
    fn ticket_payloads() {
        let ticket = parse_ticket(r#"{"bookingId":"b-1","roomId":"tomb","teamName":"Raiders"}"#).unwrap();
        assert_eq!(ticket.booking_id, "b-1");
        assert_eq!(ticket.team_name.as_deref(), Some("Raiders"));
        assert!(parse_ticket(r#"{"roomId":"tomb"}"#).is_err());
        assert!(parse_ticket("not json").is_err());
    }

    #[test]
    fn map_summary() {
        let layout = escape_room_engine::VenueLayout::bundled().unwrap();
        let map = RoomMap { puzzles: layout.puzzles.clone(), sensors: layout.sensors.clone(), ..Default::default() };
        assert_eq!(summarize(&map), "0/4 puzzles solved, sensors on: [exit_maglock], hints waiting: 0");
    }

    #[test]
    fn auto_approval_sends_each_request_once() {
        use escape_shared_types::{HintRequest, HintRequestState};
        let request = |state| HintRequest {
            puzzle_id: "puzzle_1".into(),
            stage_id: "stage_1".into(),
            state,
            player_id: None,
            created_at: None,
        };
        let mut map = RoomMap::default();
        map.hint_requests.insert("r1".into(), request(HintRequestState::Pending));
        map.hint_requests.insert("r2".into(), request(HintRequestState::Declined));
        let mut sent = HashSet::new();

        assert_eq!(unsent_approvals(&map, &mut sent), vec!["r1".to_string()]);
        assert!(unsent_approvals(&map, &mut sent).is_empty());

        map.hint_requests.insert("r3".into(), request(HintRequestState::Pending));
        assert_eq!(unsent_approvals(&map, &mut sent), vec!["r3".to_string()]);
    }

    #[test]
    fn cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
        let cli = Cli::try_parse_from(["staff", "--controller", "http://room:9000", "sensor", "exit_maglock", "--off"]).unwrap();
        assert_eq!(cli.controller, "http://room:9000");
        assert!(matches!(cli.command, Commands::Sensor { off: true, .. }));
    }
}
