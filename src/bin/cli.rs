// Duel Server CLI Validation Tool
// Talks to a running duel server: health checks, hosting and joining duels,
// and automated validation scenarios.

use clap::{Parser, Subcommand};
use colored::*;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::io::{self, Write};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Parser)]
#[command(name = "duel-cli")]
#[command(about = "Duel Server CLI Validation Tool", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:3000)
    #[arg(short, long, default_value = "127.0.0.1:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Get server configuration
    Config,

    /// Show the current state of a duel room
    Room {
        /// Class ID of the room
        class_id: String,
    },

    /// Host a duel and stay connected
    Host {
        #[arg(short, long)]
        class_id: String,

        /// Host user ID (used for the session token)
        #[arg(short, long)]
        user_id: i64,

        #[arg(short, long, default_value = "host")]
        name: String,

        /// Study set to quiz on
        #[arg(long)]
        set_id: Option<i64>,

        /// Start the game automatically after this many seconds
        #[arg(long)]
        start_after: Option<u64>,
    },

    /// Join a duel and answer every question correctly
    Play {
        #[arg(short, long)]
        class_id: String,

        #[arg(short, long)]
        user_id: i64,

        #[arg(short, long)]
        name: String,

        /// Delay between answers in milliseconds
        #[arg(long, default_value_t = 800)]
        delay_ms: u64,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation tests
        #[arg(short, long)]
        all: bool,

        /// Test specific scenario
        #[arg(short, long)]
        scenario: Option<String>,

        /// Study set with terms, used by the full-round scenario
        #[arg(long, default_value_t = 7)]
        set_id: i64,
    },

    /// Interactive mode - send custom events
    Interactive {
        #[arg(short, long)]
        user_id: i64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => check_health(&cli.server).await,
        Commands::Config => check_config(&cli.server).await,
        Commands::Room { class_id } => show_room(&cli.server, class_id).await,
        Commands::Host {
            class_id,
            user_id,
            name,
            set_id,
            start_after,
        } => host_duel(&cli.server, class_id, *user_id, name, *set_id, *start_after).await,
        Commands::Play {
            class_id,
            user_id,
            name,
            delay_ms,
        } => play_duel(&cli.server, class_id, *user_id, name, *delay_ms).await,
        Commands::Validate { all, scenario, set_id } => {
            if *all {
                run_all_validations(&cli.server, *set_id).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, s, *set_id).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
        Commands::Interactive { user_id } => interactive_mode(&cli.server, *user_id).await,
    }
}

fn ws_url(server: &str, user_id: i64) -> String {
    let token = format!("mock_jwt_token_{user_id}");
    format!("ws://{}/duel?token={}", server, urlencoding::encode(&token))
}

async fn connect(server: &str, user_id: i64) -> Option<WsStream> {
    match connect_async(ws_url(server, user_id)).await {
        Ok((ws_stream, _)) => Some(ws_stream),
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            None
        }
    }
}

async fn send_event(ws: &mut WsStream, event: &str, data: Value) -> bool {
    let frame = json!({ "event": event, "data": data });
    ws.send(Message::Text(frame.to_string())).await.is_ok()
}

/// Waits for the next JSON event, skipping control frames.
async fn next_event(ws: &mut WsStream, secs: u64) -> Option<Value> {
    loop {
        match timeout(Duration::from_secs(secs), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).ok(),
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return None,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                println!("{} Connection error: {}", "✗".red(), e);
                return None;
            }
            Err(_) => return None,
        }
    }
}

fn print_roster(players: &Value) {
    if let Some(players) = players.as_array() {
        for p in players {
            println!(
                "  {:>6}  {:<20} score {:>5}  progress {:>5.1}%",
                p["id"],
                p["username"].as_str().unwrap_or("?"),
                p["score"],
                p["progress"].as_f64().unwrap_or(0.0)
            );
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/duel/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                    println!("  Rooms: {}", body["rooms"]);
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_config(server: &str) {
    println!("{}", "Fetching server configuration...".cyan());

    let url = format!("http://{}/duel/config", server);
    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => {
            println!("{} Config endpoint accessible", "✓".green());
            if let Ok(body) = resp.json::<Value>().await {
                println!("\nConfiguration:");
                println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
            }
        }
        Ok(resp) => println!("{} Config fetch failed: {}", "✗".red(), resp.status()),
        Err(e) => println!("{} Cannot connect to server: {}", "✗".red(), e),
    }
}

async fn show_room(server: &str, class_id: &str) {
    let url = format!("http://{}/duel/rooms/{}", server, urlencoding::encode(class_id));
    match reqwest::get(&url).await {
        Ok(resp) => {
            let status = resp.status();
            let body = resp.json::<Value>().await.unwrap_or(Value::Null);
            if status.is_success() {
                println!("{} Room {}", "✓".green(), class_id.bold());
                println!("  Status: {}", body["status"].as_str().unwrap_or("unknown").cyan());
                println!("  Host: {}  Set: {}", body["hostId"], body["setId"]);
                println!(
                    "  Question: {} of {}",
                    body["currentQuestionIndex"], body["questionCount"]
                );
                print_roster(&body["players"]);
            } else {
                println!("{} {}", "✗".red(), body["message"].as_str().unwrap_or("request failed"));
            }
        }
        Err(e) => println!("{} Cannot connect to server: {}", "✗".red(), e),
    }
}

async fn host_duel(
    server: &str,
    class_id: &str,
    user_id: i64,
    name: &str,
    set_id: Option<i64>,
    start_after: Option<u64>,
) {
    println!("{}", "Creating class duel...".cyan());
    println!("  Class ID: {}", class_id);
    println!("  Host: {} ({})", name, user_id);

    let Some(mut ws) = connect(server, user_id).await else {
        return;
    };

    let created = send_event(
        &mut ws,
        "create_class_duel",
        json!({ "classId": class_id, "hostId": user_id, "hostName": name, "setId": set_id }),
    )
    .await;
    if !created {
        println!("{} Failed to send create_class_duel", "✗".red());
        return;
    }
    println!("{} Duel created, waiting for players", "✓".green());
    println!("Press {} to disconnect.", "Ctrl+C".bold());

    let mut start_at = start_after.map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));

    loop {
        if let Some(at) = start_at {
            if tokio::time::Instant::now() >= at {
                start_at = None;
                println!("{}", "Starting game...".cyan());
                if !send_event(&mut ws, "start_game", json!({ "classId": class_id })).await {
                    println!("{} Failed to send start_game", "✗".red());
                    return;
                }
            }
        }

        match timeout(Duration::from_secs(1), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let event: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                print_event(&event);
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                println!("{} Server closed the connection", "✗".yellow());
                break;
            }
            Ok(Some(Ok(_))) | Err(_) => continue,
            Ok(Some(Err(e))) => {
                println!("{} Connection error: {}", "✗".red(), e);
                break;
            }
        }
    }
}

fn print_event(event: &Value) {
    match event["event"].as_str() {
        Some("player_joined") => {
            println!("{} Roster", "◀".green());
            print_roster(&event["data"]);
        }
        Some("scoreboard_update") => {
            println!("{} Scoreboard", "◀".green());
            print_roster(&event["data"]);
        }
        Some("game_finished") => {
            println!("{} Duel finished", "★".yellow().bold());
            print_roster(&event["data"]);
        }
        Some("game_started") => {
            let count = event["data"]["questions"].as_array().map(Vec::len).unwrap_or(0);
            println!("{} Game started with {} questions", "◀".green(), count);
        }
        Some("error") => {
            println!("{} Error: {}", "✗".red(), event["data"]["message"]);
        }
        _ => println!("{} {}", "◀".green(), event.to_string().bright_white()),
    }
}

async fn play_duel(server: &str, class_id: &str, user_id: i64, name: &str, delay_ms: u64) {
    let Some(mut ws) = connect(server, user_id).await else {
        return;
    };

    send_event(
        &mut ws,
        "join_class_duel",
        json!({ "classId": class_id, "userId": user_id, "username": name }),
    )
    .await;
    println!("{} Joined class {}, waiting for the host to start", "✓".green(), class_id);

    let questions = loop {
        let Some(event) = next_event(&mut ws, 3600).await else {
            println!("{} Connection closed before the game started", "✗".red());
            return;
        };
        if event["event"] == "game_started" {
            break event["data"]["questions"].as_array().cloned().unwrap_or_default();
        }
        print_event(&event);
        if event["event"] == "error" {
            return;
        }
    };

    println!("{} {} questions", "▶".cyan(), questions.len());
    let total = questions.len();
    let mut score = 0;
    for (index, question) in questions.iter().enumerate() {
        println!(
            "  {} {} → {}",
            format!("Q{}", index + 1).bold(),
            question["term"].as_str().unwrap_or("?"),
            question["correctAnswer"].as_str().unwrap_or("?").green()
        );
        sleep(Duration::from_millis(delay_ms)).await;
        score += 100;
        let progress = (index + 1) as f64 / total as f64 * 100.0;
        send_event(
            &mut ws,
            "update_progress",
            json!({ "classId": class_id, "userId": user_id, "score": score, "progress": progress }),
        )
        .await;
    }

    while let Some(event) = next_event(&mut ws, 5).await {
        let finished = event["event"] == "game_finished";
        print_event(&event);
        if finished {
            break;
        }
    }
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    println!("  {} - Basic WebSocket connection test", "connection".cyan());
    println!("  {} - Upgrade without a token is refused", "unauthorized".cyan());
    println!("  {} - Joining an unknown room returns an error", "invalid-room".cyan());
    println!("  {} - Host creates, player joins twice, roster has one entry", "join-dedup".cyan());
    println!("  {} - Non-host start is refused", "non-host-start".cyan());
    println!("  {} - Create, join, start, report progress", "full-round".cyan());
    println!("\nExample: duel-cli validate --scenario full-round --set-id 7");
}

async fn run_scenario(server: &str, scenario: &str, set_id: i64) -> bool {
    println!("\n{} {}", "Running scenario:".bold(), scenario.cyan());
    println!("{}", "─".repeat(60));

    let result = match scenario {
        "connection" => validate_connection(server).await,
        "unauthorized" => validate_unauthorized(server).await,
        "invalid-room" => validate_invalid_room(server).await,
        "join-dedup" => validate_join_dedup(server).await,
        "non-host-start" => validate_non_host_start(server).await,
        "full-round" => validate_full_round(server, set_id).await,
        _ => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
            return false;
        }
    };

    if result {
        println!("\n{} Scenario passed", "✓".green().bold());
    } else {
        println!("\n{} Scenario failed", "✗".red().bold());
    }
    result
}

async fn run_all_validations(server: &str, set_id: i64) {
    println!("\n{}", "Running All Validation Tests".bold().green());
    println!("{}\n", "═".repeat(60).green());

    let scenarios = [
        "connection",
        "unauthorized",
        "invalid-room",
        "join-dedup",
        "non-host-start",
        "full-round",
    ];

    let mut passed = 0;
    for scenario in scenarios {
        if run_scenario(server, scenario, set_id).await {
            passed += 1;
        }
    }

    println!("\n{}", "═".repeat(60).green());
    let summary = format!("{passed}/{} scenarios passed", scenarios.len());
    if passed == scenarios.len() {
        println!("{}", summary.green().bold());
    } else {
        println!("{}", summary.red().bold());
    }
}

/// Unique class id per run so scenarios never collide with real rooms.
fn scenario_class_id(name: &str) -> String {
    format!("cli-{}-{}", name, rand::random::<u32>())
}

async fn validate_connection(server: &str) -> bool {
    match connect(server, 1).await {
        Some(ws) => {
            println!("{} WebSocket connection established", "✓".green());
            drop(ws);
            true
        }
        None => false,
    }
}

async fn validate_unauthorized(server: &str) -> bool {
    let url = format!("ws://{}/duel", server);
    match connect_async(&url).await {
        Ok(_) => {
            println!("{} Upgrade without token was accepted", "✗".red());
            false
        }
        Err(_) => {
            println!("{} Upgrade without token was refused", "✓".green());
            true
        }
    }
}

async fn validate_invalid_room(server: &str) -> bool {
    let Some(mut ws) = connect(server, 501).await else {
        return false;
    };
    let class_id = scenario_class_id("missing");
    send_event(
        &mut ws,
        "join_class_duel",
        json!({ "classId": class_id, "userId": 501, "username": "ghost" }),
    )
    .await;

    match next_event(&mut ws, 3).await {
        Some(event) if event["event"] == "error" => {
            println!("{} Error received: {}", "✓".green(), event["data"]["message"]);
            true
        }
        other => {
            println!("{} Expected error, got {:?}", "✗".red(), other);
            false
        }
    }
}

async fn validate_join_dedup(server: &str) -> bool {
    let class_id = scenario_class_id("dedup");
    let (Some(mut host), Some(mut player)) = (connect(server, 601).await, connect(server, 602).await) else {
        return false;
    };

    send_event(
        &mut host,
        "create_class_duel",
        json!({ "classId": class_id, "hostId": 601, "hostName": "cli host", "setId": null }),
    )
    .await;
    sleep(Duration::from_millis(200)).await;

    let join = json!({ "classId": class_id, "userId": 602, "username": "cli player" });
    send_event(&mut player, "join_class_duel", join.clone()).await;
    next_event(&mut player, 3).await;
    send_event(&mut player, "join_class_duel", join).await;

    match next_event(&mut player, 3).await {
        Some(event) if event["event"] == "player_joined" => {
            let count = event["data"].as_array().map(Vec::len).unwrap_or(0);
            if count == 1 {
                println!("{} Roster holds a single entry", "✓".green());
                true
            } else {
                println!("{} Roster holds {} entries", "✗".red(), count);
                false
            }
        }
        other => {
            println!("{} Expected player_joined, got {:?}", "✗".red(), other);
            false
        }
    }
}

async fn validate_non_host_start(server: &str) -> bool {
    let class_id = scenario_class_id("nonhost");
    let (Some(mut host), Some(mut player)) = (connect(server, 701).await, connect(server, 702).await) else {
        return false;
    };

    send_event(
        &mut host,
        "create_class_duel",
        json!({ "classId": class_id, "hostId": 701, "hostName": "cli host", "setId": 1 }),
    )
    .await;
    sleep(Duration::from_millis(200)).await;
    send_event(
        &mut player,
        "join_class_duel",
        json!({ "classId": class_id, "userId": 702, "username": "cli player" }),
    )
    .await;
    next_event(&mut player, 3).await;

    send_event(&mut player, "start_game", json!({ "classId": class_id })).await;
    match next_event(&mut player, 3).await {
        Some(event) if event["event"] == "error" => {
            println!("{} Start refused: {}", "✓".green(), event["data"]["message"]);
            true
        }
        other => {
            println!("{} Expected error, got {:?}", "✗".red(), other);
            false
        }
    }
}

async fn validate_full_round(server: &str, set_id: i64) -> bool {
    let class_id = scenario_class_id("round");
    let (Some(mut host), Some(mut player)) = (connect(server, 801).await, connect(server, 802).await) else {
        return false;
    };

    send_event(
        &mut host,
        "create_class_duel",
        json!({ "classId": class_id, "hostId": 801, "hostName": "cli host", "setId": set_id }),
    )
    .await;
    sleep(Duration::from_millis(200)).await;

    send_event(
        &mut player,
        "join_class_duel",
        json!({ "classId": class_id, "userId": 802, "username": "cli player" }),
    )
    .await;
    if next_event(&mut player, 3).await.map(|e| e["event"] == "player_joined") != Some(true) {
        println!("{} Player did not receive roster", "✗".red());
        return false;
    }
    println!("{} Player joined", "✓".green());
    next_event(&mut host, 3).await;

    send_event(&mut host, "start_game", json!({ "classId": class_id })).await;
    let questions = match next_event(&mut player, 5).await {
        Some(event) if event["event"] == "game_started" => {
            event["data"]["questions"].as_array().cloned().unwrap_or_default()
        }
        other => {
            println!("{} Expected game_started, got {:?}", "✗".red(), other);
            return false;
        }
    };
    println!("{} Game started with {} questions", "✓".green(), questions.len());
    if questions.is_empty() {
        println!("{} Set {} has no terms on this server", "⚠".yellow(), set_id);
    }

    let well_formed = questions.iter().all(|q| {
        let options = q["options"].as_array().cloned().unwrap_or_default();
        options.len() == 4 && options.iter().filter(|o| **o == q["correctAnswer"]).count() == 1
    });
    if !well_formed {
        println!("{} A question has malformed options", "✗".red());
        return false;
    }

    send_event(
        &mut player,
        "update_progress",
        json!({ "classId": class_id, "userId": 802, "score": 100, "progress": 25 }),
    )
    .await;
    match next_event(&mut player, 3).await {
        Some(event) if event["event"] == "scoreboard_update" => {
            let entry = &event["data"][0];
            let ok = entry["score"] == 100 && entry["progress"].as_f64() == Some(25.0);
            if ok {
                println!("{} Scoreboard reflects progress", "✓".green());
            } else {
                println!("{} Unexpected scoreboard entry {}", "✗".red(), entry);
            }
            ok
        }
        other => {
            println!("{} Expected scoreboard_update, got {:?}", "✗".red(), other);
            false
        }
    }
}

async fn interactive_mode(server: &str, user_id: i64) {
    println!("\n{}", "Interactive Mode".bold().green());
    println!("{}", "═".repeat(60).green());
    println!("Type {} for help, {} to quit\n", "help".cyan(), "quit".cyan());

    let Some(ws_stream) = connect(server, user_id).await else {
        return;
    };
    println!("{} Connected as user {}", "✓".green(), user_id);

    let (mut write, mut read) = ws_stream.split();

    let receive_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = read.next().await {
            if let Message::Text(text) = msg {
                println!("\n{} {}", "◀".green(), text.bright_white());
            }
        }
    });

    loop {
        print!("{} ", "►".cyan());
        if io::stdout().flush().is_err() {
            break;
        }

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            println!("Goodbye!");
            break;
        }
        if input == "help" {
            print_interactive_help(user_id);
            continue;
        }

        if let Ok(parsed) = serde_json::from_str::<Value>(input) {
            if write.send(Message::Text(parsed.to_string())).await.is_ok() {
                println!("{} Event sent", "✓".green());
            } else {
                println!("{} Failed to send event", "✗".red());
                break;
            }
        } else {
            println!("{} Invalid JSON. Type 'help' for examples.", "✗".yellow());
        }
    }

    receive_task.abort();
}

fn print_interactive_help(user_id: i64) {
    println!("\n{}", "Interactive Mode Commands".bold());
    println!("{}", "─".repeat(60));
    println!("Send JSON events directly to the server.\n");

    println!("{}:", "Create Duel".cyan());
    println!(
        r#"  {{"event":"create_class_duel","data":{{"classId":"C1","hostId":{user_id},"hostName":"Host","setId":7}}}}"#
    );
    println!("\n{}:", "Join Duel".cyan());
    println!(
        r#"  {{"event":"join_class_duel","data":{{"classId":"C1","userId":{user_id},"username":"alice"}}}}"#
    );
    println!("\n{}:", "Start Game".cyan());
    println!(r#"  {{"event":"start_game","data":{{"classId":"C1"}}}}"#);
    println!("\n{}:", "Update Progress".cyan());
    println!(
        r#"  {{"event":"update_progress","data":{{"classId":"C1","userId":{user_id},"score":100,"progress":25}}}}"#
    );

    println!("\n{}: quit, exit", "Commands".bold());
    println!();
}
