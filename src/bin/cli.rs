// Poll Server CLI
// Joins rooms from the terminal and validates server behaviour end to end

use clap::{Parser, Subcommand};
use colored::*;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::io::{self, Write};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Parser)]
#[command(name = "pollroom-cli")]
#[command(about = "Live classroom poll CLI", long_about = None)]
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

    /// Join a room and interact with it
    Join {
        /// Room code to join
        #[arg(short, long)]
        room: String,

        /// teacher or student
        #[arg(long, default_value = "student")]
        role: String,

        /// Display name
        #[arg(short, long)]
        name: String,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation scenarios
        #[arg(short, long)]
        all: bool,

        /// Run one scenario
        #[arg(short, long)]
        scenario: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Join { room, role, name } => {
            join_room(&cli.server, room, role, name).await;
        }
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                    println!("  Rooms: {}", body["rooms"]);
                    println!("  Connections: {}", body["connections"]);
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

async fn join_room(server: &str, room: &str, role: &str, name: &str) {
    let url = format!("ws://{}/ws", server);

    let (ws_stream, _) = match connect_async(&url).await {
        Ok(connection) => connection,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let msg = json!({"type": "joinRoom", "roomCode": room, "role": role, "name": name});
    if write.send(Message::Text(msg.to_string())).await.is_err() {
        println!("{} Failed to send joinRoom message", "✗".red());
        return;
    }

    // Spawn task to print incoming events
    let receive_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = read.next().await {
            if let Message::Text(text) = msg {
                match serde_json::from_str::<Value>(&text) {
                    Ok(event) => println!("\n{} {}", "◀".green(), describe(&event)),
                    Err(_) => println!("\n{} {}", "◀".green(), text.bright_white()),
                }
            }
        }
        println!("\n{} Connection closed", "✗".yellow());
    });

    println!("Type {} for commands, {} to leave\n", "help".cyan(), "quit".cyan());

    loop {
        print!("{} ", "►".cyan());
        if io::stdout().flush().is_err() {
            break;
        }

        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }
        if input == "help" {
            print_interactive_help();
            continue;
        }

        match parse_command(input) {
            Ok(message) => {
                if write.send(Message::Text(message.to_string())).await.is_err() {
                    println!("{} Failed to send message", "✗".red());
                    break;
                }
            }
            Err(e) => println!("{} {}", "✗".yellow(), e),
        }
    }

    let _ = write.close().await;
    receive_task.abort();
}

/// Turn a shorthand command line into a protocol message
fn parse_command(input: &str) -> Result<Value, String> {
    if input.starts_with('{') {
        return serde_json::from_str(input).map_err(|e| format!("Invalid JSON: {}", e));
    }

    let (command, rest) = input.split_once(' ').unwrap_or((input, ""));
    let rest = rest.trim();

    match command {
        "ask" => {
            let (duration, body) = rest
                .split_once(' ')
                .ok_or("usage: ask <seconds> <question>|<option>|*<correct option>")?;
            let duration: u64 = duration
                .parse()
                .map_err(|_| format!("Invalid duration: {}", duration))?;

            let mut parts = body.split('|').map(str::trim);
            let text = parts.next().unwrap_or_default();
            let options: Vec<Value> = parts
                .map(|option| match option.strip_prefix('*') {
                    Some(correct) => json!({"text": correct, "isCorrect": true}),
                    None => json!({"text": option, "isCorrect": false}),
                })
                .collect();

            if text.is_empty() || options.len() < 2 {
                return Err("A question needs text and at least 2 options".to_string());
            }

            Ok(json!({"type": "createQuestion", "text": text, "options": options, "duration": duration}))
        }
        "answer" => {
            let index: i64 = rest.parse().map_err(|_| format!("Invalid option index: {}", rest))?;
            Ok(json!({"type": "submitAnswer", "optionIndex": index}))
        }
        "end" => Ok(json!({"type": "endQuestion"})),
        "chat" if !rest.is_empty() => Ok(json!({"type": "chatMessage", "text": rest})),
        "kick" if !rest.is_empty() => Ok(json!({"type": "kickUser", "targetId": rest})),
        _ => Err(format!("Unknown command: {}. Type 'help' for usage.", input)),
    }
}

fn describe(event: &Value) -> String {
    match event["type"].as_str().unwrap_or_default() {
        "joined" => format!(
            "Joined {} as {} (id {})",
            event["roomCode"].as_str().unwrap_or("?").bold(),
            event["role"].as_str().unwrap_or("?"),
            event["connectionId"].as_str().unwrap_or("?")
        ),
        "joinError" => format!("{} {}", "Join refused:".red(), event["message"].as_str().unwrap_or("")),
        "participantsUpdate" => {
            let participants = event["participants"].as_object();
            let roster: Vec<String> = participants
                .map(|map| {
                    map.iter()
                        .map(|(id, p)| format!("{} [{}] {}", p["name"].as_str().unwrap_or("?"), p["role"].as_str().unwrap_or("?"), id))
                        .collect()
                })
                .unwrap_or_default();
            format!("Participants: {}", roster.join(", "))
        }
        "newQuestion" => {
            let options: Vec<String> = event["options"]
                .as_array()
                .map(|options| {
                    options
                        .iter()
                        .enumerate()
                        .map(|(i, o)| format!("  {}. {}", i, o["text"].as_str().unwrap_or("?")))
                        .collect()
                })
                .unwrap_or_default();
            format!(
                "{} {} ({}s)\n{}",
                "Question:".bold(),
                event["text"].as_str().unwrap_or("?"),
                event["duration"],
                options.join("\n")
            )
        }
        "resultsUpdate" => format!("Live counts: {}", event["counts"]),
        "questionEnded" => format!("Question closed, final counts: {}", event["history"][0]["results"]),
        "chatMessage" => format!(
            "{} ({}): {}",
            event["from"].as_str().unwrap_or("?").bold(),
            event["role"].as_str().unwrap_or("?"),
            event["text"].as_str().unwrap_or("")
        ),
        "kicked" => "You were removed from the room".red().to_string(),
        "teacherLeft" => "The teacher left the room".yellow().to_string(),
        _ => event.to_string(),
    }
}

fn print_interactive_help() {
    println!("\n{}", "Commands".bold());
    println!("{}", "─".repeat(60));
    println!("  {} 20 What is 2+2?|3|*4   open a question (teacher)", "ask".cyan());
    println!("  {} 1                      submit an option index", "answer".cyan());
    println!("  {}                        close the open question (teacher)", "end".cyan());
    println!("  {} hello everyone          send a chat message", "chat".cyan());
    println!("  {} <connection id>         remove a participant (teacher)", "kick".cyan());
    println!("  {{...}}                      send a raw JSON message");
    println!("  {}, {}", "quit".cyan(), "exit".cyan());
    println!();
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    println!("  {} - Basic WebSocket connection test", "connection".cyan());
    println!("  {} - Answers, re-submission and archiving", "resubmission".cyan());
    println!("  {} - Second teacher is refused", "duplicate-teacher".cyan());
    println!("  {} - Teacher leaving abandons the open question", "teacher-leaves".cyan());
    println!("\nExample: pollroom-cli validate --scenario resubmission");
}

async fn run_scenario(server: &str, scenario: &str) {
    println!("\n{} {}", "Running scenario:".bold(), scenario.cyan());
    println!("{}", "─".repeat(60));

    let result = match scenario {
        "connection" => validate_connection(server).await,
        "resubmission" => validate_resubmission(server).await,
        "duplicate-teacher" => validate_duplicate_teacher(server).await,
        "teacher-leaves" => validate_teacher_leaves(server).await,
        _ => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
            return;
        }
    };

    report(result);
}

async fn run_all_validations(server: &str) {
    println!("\n{}", "Running All Validation Tests".bold().green());
    println!("{}\n", "═".repeat(60).green());

    let scenarios = ["connection", "resubmission", "duplicate-teacher", "teacher-leaves"];
    let mut passed = 0;

    for scenario in scenarios {
        println!("\n{} Testing: {}", "▶".cyan(), scenario.bold());
        println!("{}", "─".repeat(60));

        let result = match scenario {
            "connection" => validate_connection(server).await,
            "resubmission" => validate_resubmission(server).await,
            "duplicate-teacher" => validate_duplicate_teacher(server).await,
            _ => validate_teacher_leaves(server).await,
        };
        if result {
            passed += 1;
        }
        report(result);
    }

    println!("\n{}", "═".repeat(60).green());
    println!("{} {}/{} scenarios passed", "Summary:".bold(), passed, scenarios.len());
}

fn report(result: bool) {
    if result {
        println!("\n{} Scenario passed", "✓".green().bold());
    } else {
        println!("\n{} Scenario failed", "✗".red().bold());
    }
}

/// Room codes are process-wide, so each run uses a fresh one
fn scratch_room(prefix: &str) -> String {
    format!("{}{}", prefix, rand::random::<u16>())
}

async fn open_socket(server: &str) -> Option<Socket> {
    match connect_async(format!("ws://{}/ws", server)).await {
        Ok((socket, _)) => Some(socket),
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            None
        }
    }
}

async fn send_json(socket: &mut Socket, message: Value) -> Option<()> {
    socket.send(Message::Text(message.to_string())).await.ok()
}

/// Wait for the next event of the given type, skipping others
async fn expect_event(socket: &mut Socket, kind: &str) -> Option<Value> {
    let wait = async {
        while let Some(Ok(msg)) = socket.next().await {
            if let Message::Text(text) = msg {
                if let Ok(event) = serde_json::from_str::<Value>(&text) {
                    if event["type"] == kind {
                        return Some(event);
                    }
                }
            }
        }
        None
    };

    match timeout(Duration::from_secs(3), wait).await {
        Ok(Some(event)) => Some(event),
        _ => {
            println!("{} No {} event received", "✗".red(), kind);
            None
        }
    }
}

async fn join_as(server: &str, room: &str, role: &str, name: &str) -> Option<Socket> {
    let mut socket = open_socket(server).await?;
    send_json(&mut socket, json!({"type": "joinRoom", "roomCode": room, "role": role, "name": name})).await?;
    expect_event(&mut socket, "joined").await?;
    println!("{} {} joined {} as {}", "✓".green(), name, room, role);
    Some(socket)
}

fn check(label: &str, actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        println!("{} {}: {}", "✓".green(), label, actual);
        true
    } else {
        println!("{} {}: expected {}, got {}", "✗".red(), label, expected, actual);
        false
    }
}

async fn validate_connection(server: &str) -> bool {
    match open_socket(server).await {
        Some(socket) => {
            println!("{} WebSocket connection established", "✓".green());
            drop(socket);
            true
        }
        None => false,
    }
}

async fn validate_resubmission(server: &str) -> bool {
    resubmission_flow(server).await.unwrap_or(false)
}

async fn resubmission_flow(server: &str) -> Option<bool> {
    let room = scratch_room("MATH");
    let mut teacher = join_as(server, &room, "teacher", "T").await?;
    let mut s1 = join_as(server, &room, "student", "S1").await?;
    let mut s2 = join_as(server, &room, "student", "S2").await?;

    send_json(
        &mut teacher,
        json!({
            "type": "createQuestion",
            "text": "2+2?",
            "options": [{"text": "3"}, {"text": "4", "isCorrect": true}],
            "duration": 20
        }),
    )
    .await?;
    expect_event(&mut s1, "newQuestion").await?;

    send_json(&mut s1, json!({"type": "submitAnswer", "optionIndex": 1})).await?;
    expect_event(&mut teacher, "resultsUpdate").await?;
    send_json(&mut s2, json!({"type": "submitAnswer", "optionIndex": 1})).await?;
    expect_event(&mut teacher, "resultsUpdate").await?;

    // S1 changes their mind
    send_json(&mut s1, json!({"type": "submitAnswer", "optionIndex": 0})).await?;
    let live = expect_event(&mut teacher, "resultsUpdate").await?;
    let live_ok = check("Live counts", &live["counts"], &json!([1, 1]));

    send_json(&mut teacher, json!({"type": "endQuestion"})).await?;
    let ended = expect_event(&mut teacher, "questionEnded").await?;
    let archived_ok = check("Archived results", &ended["history"][0]["results"], &json!([1, 1]));

    Some(live_ok && archived_ok)
}

async fn validate_duplicate_teacher(server: &str) -> bool {
    let room = scratch_room("Y");
    let Some(_first) = join_as(server, &room, "teacher", "First").await else {
        return false;
    };
    let Some(mut second) = open_socket(server).await else {
        return false;
    };

    if send_json(&mut second, json!({"type": "joinRoom", "roomCode": room, "role": "teacher", "name": "Second"}))
        .await
        .is_none()
    {
        return false;
    }

    match expect_event(&mut second, "joinError").await {
        Some(event) => {
            println!("{} Second teacher refused: {}", "✓".green(), event["message"]);
            true
        }
        None => false,
    }
}

async fn validate_teacher_leaves(server: &str) -> bool {
    teacher_leaves_flow(server).await.unwrap_or(false)
}

async fn teacher_leaves_flow(server: &str) -> Option<bool> {
    let room = scratch_room("BIO");
    let mut teacher = join_as(server, &room, "teacher", "T").await?;
    let mut student = join_as(server, &room, "student", "S").await?;

    send_json(
        &mut teacher,
        json!({"type": "createQuestion", "text": "Alive?", "options": [{"text": "yes"}, {"text": "no"}], "duration": 30}),
    )
    .await?;
    expect_event(&mut student, "newQuestion").await?;

    teacher.close(None).await.ok()?;
    expect_event(&mut student, "teacherLeft").await?;
    println!("{} teacherLeft received", "✓".green());

    let mut late = open_socket(server).await?;
    send_json(&mut late, json!({"type": "joinRoom", "roomCode": room, "role": "student", "name": "Late"})).await?;
    let joined = expect_event(&mut late, "joined").await?;

    let question_ok = check("Open question after teacher left", &joined["currentQuestion"], &Value::Null);
    let history_ok = check("History", &joined["history"], &json!([]));
    Some(question_ok && history_ok)
}
