//! Minimal staff-desk wiring: bootstrap the engine, attach the push channel
//! when the role allows it, and print booking events as they arrive.
//!
//! ```sh
//! cargo run --example booking_desk -- https://api.foyer.club
//! ```

use std::sync::Arc;

use foyer_sync::{HttpGateway, MemoryStore, PushEvent, SyncConfig, SyncEngine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foyer_sync=debug".into()),
        )
        .init();

    let base_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://api.foyer.club".to_string());

    let gateway = Arc::new(HttpGateway::new(&base_url)?);
    let engine = SyncEngine::new(
        gateway,
        Arc::new(MemoryStore::new()),
        SyncConfig::new(&base_url),
    );

    engine.bootstrap().await;

    let session = engine.session().snapshot();
    match session.identity.as_ref() {
        Some(member) => println!("signed in as {} ({:?})", member.email, member.role),
        None => {
            println!("no active session; log in from the portal first");
            return Ok(());
        }
    }

    engine.registry().register("desk-log", |event| {
        if let PushEvent::Booking {
            resource_id,
            status,
            ..
        } = event
        {
            println!(
                "booking {} -> {}",
                resource_id.as_deref().unwrap_or("?"),
                status.as_deref().unwrap_or("updated")
            );
        }
    });

    if session.is_privileged() {
        #[cfg(feature = "transport-websocket")]
        {
            let push_url = format!("{}/push", base_url.replacen("http", "ws", 1));
            let transport = foyer_sync::WebSocketTransport::connect(&push_url).await?;
            engine.connect_push(transport).await?;
            println!("push channel attached; watching for booking events");
        }
    } else {
        println!("member role: relying on background sync only");
    }

    tokio::signal::ctrl_c().await?;
    engine.stop().await;
    Ok(())
}
