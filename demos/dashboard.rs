use futures_util::StreamExt;
use steadylink::{
    dashboard::DashboardEvent, transport::WebsocketConnector, Client, ClientEvent, Config,
};

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let endpoint = std::env::var("DASHBOARD_URL")
        .map_err(|_| {
            println!("No DASHBOARD_URL env var or invalid");
            std::process::exit(1);
        })
        .unwrap();

    let connector = WebsocketConnector::parse(&endpoint).unwrap();
    let config = Config {
        inbound_sequence_field: Some("sn".to_string()),
        ..Config::default()
    };

    let client = Client::new(config, connector).unwrap();
    let mut events = client.subscribe().unwrap();
    client.connect().unwrap();
    client.send(r#"{"type":"subscribe","topics":["*"]}"#).unwrap();

    while let Some(event) = events.next().await {
        match event {
            ClientEvent::ConnectionChange(change) => {
                println!("[{}] {} -> {}", change.reason, change.from, change.to);
                for advice in client.recovery_recommendations() {
                    println!("  hint: {}", advice.message);
                }
            }
            ClientEvent::Message(msg) => match msg.decode::<DashboardEvent>() {
                Ok(event) => println!("{:?}", event),
                Err(err) => println!("skip message: {}", err),
            },
            ClientEvent::QueueOverflow(dropped) => {
                println!("outbound message {} dropped", dropped.sequence)
            }
            ClientEvent::Error(err) => println!("error: {}", err),
        }
    }
}
