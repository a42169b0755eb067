//! `codeloop chat`: interactive or single-message chat mode.

use std::io::Write;

use async_trait::async_trait;
use codeloop_agent::{Decision, Outcome, Session, TurnSink};
use codeloop_computer::LocalComputer;
use codeloop_config::AppConfig;
use codeloop_core::error::report;
use codeloop_core::message::{PendingCode, Role, Turn, TurnType, FORMAT_ACTIVE_LINE};
use tokio::io::{self, AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::debug;

use crate::ChatArgs;

pub async fn run(args: ChatArgs, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    apply_args(&mut config, &args, verbose);
    config.validate()?;

    // Check for an API key early and give a clear error
    if !config.session.offline && !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    export OPENAI_API_KEY='sk-...'");
        eprintln!("    export CODELOOP_API_KEY='...'      (any OpenAI-compatible provider)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let llm = codeloop_providers::build_client(&config.llm);
    let computer = Box::new(LocalComputer::new(&config.computer));
    let mut session = Session::from_config(&config, llm, computer);
    let mut sink = TerminalSink::new(config.session.auto_run);
    debug!(?session, "Session ready");

    if let Some(msg) = args.message {
        session.conversation.push(Turn::user(msg));
        reply(&mut session, &mut sink).await;
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  codeloop, interactive mode");
    println!();
    println!("  Model:     {}", session.llm.model());
    println!("  Auto-run:  {}", if sink.auto_run { "on" } else { "off" });
    println!("  Loop:      {}", if session.loop_enabled { "on" } else { "off" });
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type '/reset' to start over, 'exit' or Ctrl+D to quit.");
    println!("  Ctrl+C interrupts the current reply.");
    println!();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = sink.read_line().await else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q") {
            break;
        }
        if line == "/reset" {
            session.reset();
            println!("  Conversation cleared.");
            println!();
            continue;
        }

        session.conversation.push(Turn::user(line));
        reply(&mut session, &mut sink).await;
        println!();
    }

    println!("  Goodbye!");
    Ok(())
}

fn apply_args(config: &mut AppConfig, args: &ChatArgs, verbose: bool) {
    if let Some(model) = &args.model {
        config.llm.model = model.clone();
    }
    if let Some(budget) = args.max_budget {
        config.llm.max_budget = Some(budget);
    }
    if args.auto_run {
        config.session.auto_run = true;
    }
    if args.no_loop {
        config.session.loop_enabled = false;
    }
    if verbose {
        config.session.verbose = true;
    }
}

/// Run one reply, interruptible with Ctrl+C.
async fn reply(session: &mut Session, sink: &mut TerminalSink) {
    let result = tokio::select! {
        result = codeloop_agent::respond(session, sink) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    sink.finish();

    match result {
        None => {
            // The interrupted reply keeps what was streamed so far
            session.conversation.seal();
            println!("  [Interrupted]");
        }
        Some(Ok(Outcome::Cancelled)) => println!("  [Cancelled]"),
        Some(Ok(Outcome::RepeatedUnsupported)) => {
            println!("  [Stopped: the model kept asking for a language that cannot run]")
        }
        Some(Ok(outcome)) => debug!(?outcome, "Reply finished"),
        Some(Err(e)) => {
            eprintln!();
            eprintln!("  [Error] {}", report(&e));
        }
    }
}

/// Writes streamed turns to stdout and asks questions on stdin.
struct TerminalSink {
    auto_run: bool,
    stdin: Lines<BufReader<Stdin>>,
    /// Kind of the last printed turn, to frame code blocks and output
    last: Option<TurnType>,
}

impl TerminalSink {
    fn new(auto_run: bool) -> Self {
        Self {
            auto_run,
            stdin: BufReader::new(io::stdin()).lines(),
            last: None,
        }
    }

    async fn read_line(&mut self) -> Option<String> {
        self.stdin.next_line().await.ok().flatten()
    }

    /// Close whatever block is open.
    fn finish(&mut self) {
        self.switch_to(None);
        println!();
    }

    fn switch_to(&mut self, kind: Option<TurnType>) {
        if self.last == kind {
            return;
        }
        match self.last {
            Some(TurnType::Code) => println!("\n```"),
            Some(TurnType::Console) => println!(),
            _ => {}
        }
        match kind {
            Some(TurnType::Code) => print!("\n```"),
            Some(TurnType::Console) => println!(),
            _ => {}
        }
        self.last = kind;
    }

    async fn ask(&mut self, prompt: &str) -> String {
        print!("{prompt}");
        let _ = std::io::stdout().flush();
        self.read_line().await.unwrap_or_default().trim().to_lowercase()
    }
}

#[async_trait]
impl TurnSink for TerminalSink {
    fn emit(&mut self, turn: &Turn) {
        if turn.role == Role::User || turn.kind == TurnType::Confirmation {
            return;
        }
        if turn.format() == Some(FORMAT_ACTIVE_LINE) {
            return;
        }

        if turn.kind == TurnType::Code && self.last != Some(TurnType::Code) {
            self.switch_to(Some(TurnType::Code));
            println!("{}", turn.format().unwrap_or_default());
        } else {
            self.switch_to(Some(turn.kind));
        }
        print!("{}", turn.text());
        let _ = std::io::stdout().flush();
    }

    fn display_message(&mut self, message: &str) {
        self.switch_to(None);
        println!();
        println!("{message}");
        println!();
    }

    async fn confirm(&mut self, pending: &PendingCode) -> Decision {
        self.switch_to(None);
        if self.auto_run {
            return Decision::Approve;
        }

        let answer = self
            .ask(&format!("\n  Run this {} code? (y/n/e to edit) ", pending.format))
            .await;
        match answer.as_str() {
            "y" | "yes" => Decision::Approve,
            "e" | "edit" => {
                println!("  Enter the replacement code, then a line with a single '.':");
                let mut code = Vec::new();
                while let Some(line) = self.read_line().await {
                    if line.trim() == "." {
                        break;
                    }
                    code.push(line);
                }
                Decision::Edit(code.join("\n"))
            }
            _ => Decision::Cancel,
        }
    }

    async fn ask_model_switch(&mut self, question: &str) -> bool {
        self.switch_to(None);
        println!();
        println!("{question}");
        matches!(self.ask("  > ").await.as_str(), "y" | "yes")
    }
}
