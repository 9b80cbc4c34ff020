mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::info;

use switchboard_core::assistant::Assistant;
use switchboard_core::events::DispatchEvent;
use switchboard_core::generator::TurnGenerator;
use switchboard_core::ids::{AssistantId, SessionId};
use switchboard_core::messages::{ConversationMessage, Role};
use switchboard_engine::orchestration::ORCHESTRATOR_ID;
use switchboard_engine::providers::weather;
use switchboard_engine::{
    CapabilityRegistry, DispatchLoop, DispatchOutcome, EchoGenerator, OrchestrationController,
    ScriptedGenerator, ScriptedTurn, SessionContext, StdioRemoteClient,
};
use switchboard_store::{Database, MessageRepo, SessionRepo};
use switchboard_telemetry::init_telemetry;

use crate::settings::{load_settings, SwitchboardSettings};

#[derive(Parser)]
#[command(name = "switchboard", version, about = "Capability dispatch and assistant orchestration")]
struct Cli {
    /// Settings file (defaults to ~/.switchboard/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered providers and what each assistant can call.
    Capabilities,
    /// Run a scripted orchestration session and print the transcript.
    Demo {
        /// Keep the transcript in the configured database instead of memory.
        #[arg(long)]
        persist: bool,
    },
    /// Send one prompt to a session and drive it until it settles.
    Run {
        /// Existing session id. A new session is created when omitted.
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        prompt: String,
    },
}

/// Everything a dispatch run needs, wired from settings.
struct Runtime {
    registry: Arc<CapabilityRegistry>,
    context: Arc<SessionContext>,
    controller: OrchestrationController,
    remote: Arc<StdioRemoteClient>,
    event_tx: broadcast::Sender<DispatchEvent>,
}

impl Runtime {
    fn new(settings: &SwitchboardSettings, assistants: Vec<Assistant>) -> anyhow::Result<Self> {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register(weather::provider());

        let context = Arc::new(SessionContext::with_assistants(assistants));
        let (event_tx, _) = broadcast::channel(1024);
        let controller = OrchestrationController::new(Arc::clone(&context), event_tx.clone());

        if settings.orchestrate {
            controller.activate(&registry)?;
        } else {
            let id = settings
                .default_assistant
                .clone()
                .or_else(|| context.assistants().first().map(|a| a.id.to_string()))
                .context("orchestration is off and no assistants are configured")?;
            if !context.set_active_assistant(&AssistantId::from_raw(&id)) {
                bail!("default assistant {id} is not configured");
            }
        }

        let remote =
            Arc::new(StdioRemoteClient::new().with_request_timeout(settings.remote_timeout()));
        Ok(Self {
            registry,
            context,
            controller,
            remote,
            event_tx,
        })
    }

    fn dispatch(
        &self,
        settings: &SwitchboardSettings,
        db: Database,
        generator: Arc<dyn TurnGenerator>,
    ) -> DispatchLoop {
        DispatchLoop::new(
            Arc::clone(&self.registry),
            self.remote.clone(),
            Arc::new(MessageRepo::new(db)),
            generator,
            Arc::clone(&self.context),
            self.event_tx.clone(),
        )
        .with_config(settings.dispatch_config())
    }
}

fn open_database(settings: &SwitchboardSettings, persist: bool) -> anyhow::Result<Database> {
    match settings.database_path().filter(|_| persist) {
        Some(path) => {
            Database::open(&path).with_context(|| format!("opening database {}", path.display()))
        }
        None => Ok(Database::in_memory()?),
    }
}

fn print_transcript(messages: &[ConversationMessage]) {
    for msg in messages {
        let speaker = match (&msg.role, &msg.assistant_id) {
            (Role::Assistant, Some(id)) => format!("assistant:{id}"),
            (role, _) => role.to_string(),
        };
        if msg.content.is_empty() && !msg.tool_calls.is_empty() {
            let calls: Vec<String> = msg
                .tool_calls
                .iter()
                .map(|c| format!("{}({})", c.name(), c.function.arguments))
                .collect();
            println!("{speaker:>32} | calls {}", calls.join(", "));
        } else {
            println!("{speaker:>32} | {}", msg.content);
        }
    }
}

fn print_outcome(outcome: DispatchOutcome) {
    match outcome {
        DispatchOutcome::Settled { turns } => println!("settled after {turns} follow-up turn(s)"),
        DispatchOutcome::TurnLimitReached { turns } => {
            println!("stopped: turn limit reached after {turns} turn(s)")
        }
        DispatchOutcome::Busy => println!("session is busy"),
    }
}

fn capabilities(settings: &SwitchboardSettings) -> anyhow::Result<()> {
    let runtime = Runtime::new(settings, settings.assistants.clone())?;

    println!("providers:");
    for provider in runtime.registry.list_provider_names() {
        println!("  {provider}");
        for def in runtime.registry.list_capabilities(&provider) {
            println!("    {:<20} {}", def.name, def.description);
        }
    }

    println!("assistants:");
    for assistant in runtime.context.assistants() {
        let names: Vec<String> = runtime
            .registry
            .definitions_for(&assistant)
            .into_iter()
            .map(|d| d.name)
            .collect();
        println!("  {} ({}): {}", assistant.name, assistant.id, names.join(", "));
        for server in &assistant.remote_servers {
            println!("    remote {} via {}", server.name, server.transport);
        }
    }
    Ok(())
}

fn demo_script() -> Vec<ScriptedTurn> {
    vec![
        ScriptedTurn::calls([
            ("setPlan", json!({"items": ["Check the weather in Paris", "Summarize for the user"]})),
            (
                "switchAssistant",
                json!({
                    "assistantId": "forecaster",
                    "instruction": "What is the weather in Paris?"
                }),
            ),
        ]),
        ScriptedTurn::call(weather::GET_CURRENT_WEATHER, json!({"location": "Paris"})),
        ScriptedTurn::calls([
            ("checkPlanItem", json!({"index": 0})),
            (
                "switchAssistant",
                json!({"assistantId": ORCHESTRATOR_ID, "instruction": "It is 22°C in Paris."}),
            ),
        ]),
        ScriptedTurn::calls([
            ("checkPlanItem", json!({"index": 1})),
            ("reportResult", json!({"resultInDetail": "Paris is currently 22°C."})),
        ]),
        ScriptedTurn::text("Anything else?"),
    ]
}

async fn demo(settings: &SwitchboardSettings, persist: bool) -> anyhow::Result<()> {
    let forecaster = Assistant::new(AssistantId::from_raw("forecaster"), "Forecaster")
        .with_system_prompt("You report current weather conditions.")
        .with_provider(weather::PROVIDER_NAME)
        .with_provider(switchboard_engine::orchestration::PROVIDER_NAME);
    let mut assistants = settings.assistants.clone();
    assistants.retain(|a| a.id != forecaster.id);
    assistants.push(forecaster);

    let mut demo_settings = settings.clone();
    demo_settings.orchestrate = true;
    let runtime = Runtime::new(&demo_settings, assistants)?;

    let db = open_database(settings, persist)?;
    let session = SessionRepo::new(db.clone()).create(Some("demo"))?;
    let generator = Arc::new(ScriptedGenerator::new(demo_script()));
    let dispatch = runtime.dispatch(settings, db.clone(), generator);
    let mut events = dispatch.subscribe();

    let outcome = dispatch.prompt(&session.id, "What's the weather in Paris?").await?;

    print_transcript(&MessageRepo::new(db).list_for_session(&session.id)?);
    println!();
    print_outcome(outcome);
    println!("plan:");
    for (i, item) in runtime.controller.plan_snapshot(&session.id).iter().enumerate() {
        println!("  [{}] {i}. {}", if item.complete { "x" } else { " " }, item.description);
    }
    println!("phase: {:?}", runtime.controller.phase(&session.id));

    let mut dispatched = 0usize;
    while let Ok(event) = events.try_recv() {
        if matches!(event, DispatchEvent::ToolEnd { .. }) {
            dispatched += 1;
        }
    }
    info!(session_id = %session.id, dispatched, "demo finished");
    Ok(())
}

async fn run(
    settings: &SwitchboardSettings,
    session: Option<String>,
    prompt: &str,
) -> anyhow::Result<()> {
    let runtime = Runtime::new(settings, settings.assistants.clone())?;
    let db = open_database(settings, true)?;

    let sessions = SessionRepo::new(db.clone());
    let session = match session {
        Some(id) => sessions.get_or_create(&SessionId::from_raw(id), None)?,
        None => sessions.create(None)?,
    };
    let messages = MessageRepo::new(db.clone());
    let before = messages.count(&session.id)? as usize;

    let dispatch = runtime.dispatch(settings, db, Arc::new(EchoGenerator));
    let outcome = dispatch.prompt(&session.id, prompt).await;
    runtime.remote.shutdown();
    let outcome = outcome?;

    println!("session {}", session.id);
    let transcript = messages.list_for_session(&session.id)?;
    print_transcript(transcript.get(before..).unwrap_or_default());
    print_outcome(outcome);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.settings.as_deref()).context("loading settings")?;
    let telemetry = init_telemetry(settings.telemetry_config());
    info!(filter = telemetry.directives(), "switchboard starting");

    match cli.command {
        Command::Capabilities => capabilities(&settings),
        Command::Demo { persist } => demo(&settings, persist).await,
        Command::Run { session, prompt } => run(&settings, session, &prompt).await,
    }
}
