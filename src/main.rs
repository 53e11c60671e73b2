//! Two replicas editing one diagram over the in-memory network.
//!
//! Run with `RUST_LOG=debug` to see sync traffic.

use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weft_model::{ActionData, ActionKind, DiagramDocument};
use weft_sdk::{
    Backend, ClientConfigBuilder, ConnectionStatus, CursorState, MemoryNetwork, Session,
    SyncConfig,
};

const URL: &str = "mem://demo/diagram";

fn session(network: &MemoryNetwork, name: &str, color: &str) -> Session {
    let config = ClientConfigBuilder::new()
        .user_name(name)
        .color(color)
        .build();
    let backend = Backend::replicated_on(name.to_lowercase(), network.clone(), SyncConfig::default());
    Session::new(config, backend)
}

fn report(who: &'static str) -> impl Fn(ConnectionStatus, &str) + Send + Sync {
    move |status: ConnectionStatus, details: &str| match status {
        ConnectionStatus::Error => error!(who, details, "Connection failed"),
        _ => info!(who, ?status, details, "Connection progress"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weft=info,weft_sdk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let network = MemoryNetwork::new();
    let alice = session(&network, "Alice", "#e6194b");
    let bob = session(&network, "Bob", "#3cb44b");

    alice.connect(URL, report("alice")).await?;
    let alice_doc = DiagramDocument::from_session(&alice)?;
    alice_doc.set_title("Checkout flow")?;
    alice_doc.palette().init_defaults()?;
    alice_doc.tags().add("payments")?;
    let story = alice_doc.stories().add_story("Happy path", "A customer pays")?;
    let step = story.add_step("Cart", "Review the basket")?;
    step.add_action(&ActionData::new(ActionKind::Highlight, ["cart"]).with_caption("Items"))?;

    // Bob joins late and catches up while Alice answers
    let (joined, _) = tokio::join!(
        bob.connect(URL, report("bob")),
        alice.pump_for(Duration::from_millis(200))
    );
    joined?;
    let bob_doc = DiagramDocument::from_session(&bob)?;
    let _titles = bob_doc.on_title_change(|| info!("Bob saw a new title"));

    bob_doc.tags().add("reviewed")?;
    bob_doc.set_title("Checkout flow (v2)")?;
    bob.awareness()
        .update_cursor(CursorState::at("bob", 120.0, 48.0).with_selection(vec!["cart".into()]));
    bob.flush().await?;
    alice.pump().await?;
    alice.flush().await?;
    bob.pump().await?;

    for user in alice.awareness().get_user_states() {
        info!(user = %user.name, color = %user.color, "Present");
    }
    if alice_doc.to_json() == bob_doc.to_json() {
        info!("Replicas converged");
    } else {
        error!("Replicas diverged");
    }
    println!("{}", serde_json::to_string_pretty(&bob_doc.to_json())?);

    bob.disconnect(report("bob")).await?;
    alice.disconnect(report("alice")).await?;
    Ok(())
}
