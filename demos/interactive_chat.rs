use std::env;
use std::io::{self, Write};

use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use mcpchat::config::ChatConfig;

// Run from the root folder of the repo as follows:
// OR_API_KEY=your-openrouter-key cargo run --example interactive_chat -- [config.json] [transcript.jsonl]
//
// Without a config file the built-in calculator is the only tool server.
// Type 'exit' or 'quit' to leave; the transcript is saved if a path was given.

#[tokio::main]
async fn main() {
    mcpchat::init_logger();

    let mut args = env::args().skip(1);
    let config = match args.next() {
        Some(path) => ChatConfig::from_file(&path).unwrap_or_else(|e| {
            eprintln!("{}", e);
            std::process::exit(1);
        }),
        None => ChatConfig::default(),
    };
    let transcript_path = args.next();

    let mut session = match config.build_session().await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    println!("Model: {}", config.model);
    for tool in session.registry().all() {
        let owner = session.registry().get_tool_protocol(&tool.name).unwrap_or("?");
        println!("  [{}] {} - {}", owner, tool.name, tool.description);
    }

    loop {
        print!("\nYou: ");
        io::stdout().flush().unwrap();

        let mut line = String::new();
        if io::stdin().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let user_input = line.trim();
        if user_input.is_empty() {
            continue;
        }
        if user_input == "exit" || user_input == "quit" {
            break;
        }

        let (tx, rx) = watch::channel(true);
        tokio::spawn(display_waiting_dots(rx, 3));
        let result = session.submit(user_input).await;
        tx.send(false).unwrap();
        // let the dots task clear its line
        sleep(Duration::from_millis(50)).await;

        match result {
            Ok(messages) => {
                // The user's own line is already on screen.
                for message in messages.iter().skip(1) {
                    println!("\nAssistant:\n{}", message.text);
                }
            }
            Err(e) => println!("\nError: {}", e),
        }
    }

    let usage = session.token_usage();
    println!(
        "\nTokens used: {} in, {} out, {} total",
        usage.input_tokens, usage.output_tokens, usage.total_tokens
    );

    if let Some(path) = transcript_path {
        match session.transcript().write_jsonl(&path) {
            Ok(()) => println!("Transcript saved to {}", path),
            Err(e) => eprintln!("Could not save transcript: {}", e),
        }
    }
    session.registry().shutdown().await;
}

async fn display_waiting_dots(rx: watch::Receiver<bool>, num_dots: usize) {
    while *rx.borrow() {
        for _ in 0..num_dots {
            if !*rx.borrow() {
                break;
            }
            print!(".");
            io::stdout().flush().unwrap();
            sleep(Duration::from_millis(500)).await;
        }
        print!("\r{}\r", " ".repeat(num_dots));
        io::stdout().flush().unwrap();
    }
}
