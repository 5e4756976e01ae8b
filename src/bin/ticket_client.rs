//--------------------------------------------------------------------------------------------------
// TICKET CLIENT
//--------------------------------------------------------------------------------------------------
// Connects to RabbitMQ with the environment configuration, wires the ticket engine to
// the broker, logs every engine event, and optionally submits a demo placement.
//
// | Component                | Description                                                |
// |--------------------------|------------------------------------------------------------|
// | Args                     | Command line arguments                                     |
// | demo_ticket              | Builds a single-selection placement                        |
//--------------------------------------------------------------------------------------------------

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use uuid::Uuid;

use ticket_sdk::domain::models::ticket::{
    Bet, Selection, SelectionRef, SenderChannel, SenderInfo, Stake, StakeType,
};
use ticket_sdk::transport::amqp::AmqpTransport;
use ticket_sdk::{
    ConnectionStatus, EventBus, EventDispatcher, InboundHandler, SdkConfig, Ticket, TicketEngine,
    TracingEventHandler,
};

/// Command line arguments for the ticket client
#[derive(Parser, Debug)]
#[command(author, version, about = "Submits tickets and logs their outcomes")]
struct Args {
    /// Submit a demo placement on this selection id (prefix with "lcoo:" for live)
    #[arg(short, long)]
    selection: Option<String>,

    /// Event the demo selection belongs to
    #[arg(short, long, default_value = "sr:match:11111")]
    event: String,

    /// Stake of the demo placement, in 1/10000 of the currency unit
    #[arg(long, default_value = "10000")]
    stake: u64,

    /// Wait for the response instead of sending fire-and-forget
    #[arg(short, long)]
    blocking: bool,

    /// Seconds to keep consuming after the demo ticket was sent
    #[arg(short, long, default_value = "30")]
    linger: u64,
}

fn demo_ticket(config: &SdkConfig, args: &Args, selection_id: &str) -> Ticket {
    let ticket_id = format!("demo-{}", Uuid::new_v4());
    Ticket::new(
        ticket_id.clone(),
        SenderInfo {
            bookmaker_id: config.bookmaker_id,
            currency: config.currency.clone(),
            channel: SenderChannel::Internet,
            limit_id: config.limit_id,
            terminal_id: None,
            shop_id: None,
            end_customer: None,
        },
        vec![Selection {
            event_id: args.event.clone(),
            id: selection_id.to_string(),
            odds: 15_000,
            is_banker: false,
        }],
        vec![Bet {
            id: format!("{}-1", ticket_id),
            stake: Stake {
                value: args.stake,
                stake_type: StakeType::Total,
            },
            selection_refs: vec![SelectionRef {
                selection_index: 0,
                banker: false,
            }],
            selected_systems: vec![],
        }],
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = SdkConfig::try_from_env().context("invalid configuration")?;
    info!(
        "Starting ticket client for {} (node {})",
        config.username, config.node_id
    );

    let event_bus = EventBus::new(config.event_bus_capacity);
    let connection_status = ConnectionStatus::new(event_bus.clone());

    let dispatcher = EventDispatcher::new(event_bus.clone());
    dispatcher
        .register_handler(Arc::new(TracingEventHandler))
        .await;
    let _dispatcher_handle = dispatcher.start().await;

    let transport = AmqpTransport::connect(Arc::new(config.clone()), connection_status.clone())
        .await
        .context("failed to connect to RabbitMQ")?;

    let engine = TicketEngine::builder(config.clone())
        .event_bus(event_bus)
        .connection_status(connection_status)
        .publishers(transport.publishers())
        .build();
    engine.open().await.context("failed to open ticket senders")?;

    let receivers = transport
        .receivers()
        .await
        .context("failed to subscribe to responses")?;
    let handler: Arc<dyn InboundHandler> = Arc::new(engine.clone());
    for receiver in &receivers {
        receiver.start(Arc::clone(&handler))?;
    }
    transport.mark_connected();

    if let Some(selection_id) = args.selection.as_deref() {
        let ticket = demo_ticket(&config, &args, selection_id);
        let ticket_id = ticket.ticket_id.clone();

        if args.blocking {
            match engine.send_ticket_blocking(ticket).await {
                Ok(response) => {
                    info!("{} {:?}: {:?}", ticket_id, response.status, response.reason);
                    let response = ticket_sdk::SdkResponse::Ticket(response);
                    if let Err(e) = response.acknowledge(&engine, true) {
                        error!("Failed to acknowledge {}: {}", ticket_id, e);
                    }
                }
                Err(e) => error!("Ticket {} failed: {}", ticket_id, e),
            }
        } else {
            engine.send_ticket(ticket)?;
            info!("Sent {}, outcome will be logged", ticket_id);
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = tokio::time::sleep(Duration::from_secs(args.linger)) => {}
    }

    for receiver in &receivers {
        if let Err(e) = receiver.close().await {
            error!("Failed to close {} receiver: {}", receiver.response_type(), e);
        }
    }
    engine.close().await?;
    transport.close().await?;

    info!("Ticket client stopped");
    Ok(())
}
