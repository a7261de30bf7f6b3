use std::time::Duration;

use relay_binance::{BinanceConnector, UpstreamTarget, BINANCE_WS_BASE};
use relay_core::{ControlFrame, StreamKey, UpstreamConnection, UpstreamConnector, UpstreamEvent};

#[tokio::main]
async fn main() {
    let target = UpstreamTarget::new(BINANCE_WS_BASE);
    let connector = BinanceConnector::new(target);
    println!("Testing Binance combined stream connection...");
    println!("URL: {}", connector.target());

    println!("\n1. Attempting connection...");
    let start = std::time::Instant::now();

    let mut conn = match tokio::time::timeout(Duration::from_secs(15), connector.connect()).await {
        Ok(Ok(conn)) => {
            println!("✓ Connected in {:?}", start.elapsed());
            conn
        }
        Ok(Err(e)) => {
            println!("✗ Connection failed after {:?}: {}", start.elapsed(), e);
            return;
        }
        Err(_) => {
            println!("✗ Connection timed out after {:?}", start.elapsed());
            return;
        }
    };

    let keys: Vec<StreamKey> = ["btcusdt@aggTrade", "btcusdt@kline_1m", "ethusdt@ticker"]
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    println!("\n2. Subscribing to {} streams", keys.len());
    if let Err(e) = conn.send(ControlFrame::Subscribe(keys)).await {
        println!("✗ Failed to send subscription: {}", e);
        return;
    }
    println!("✓ Subscription sent");

    println!("\n3. Waiting for messages (30 seconds total, pinging every 10s)...");
    let test_start = std::time::Instant::now();
    let mut ping = tokio::time::interval(Duration::from_secs(10));
    let mut msg_count = 0;

    while test_start.elapsed() < Duration::from_secs(30) {
        tokio::select! {
            event = conn.recv() => {
                match event {
                    Ok(UpstreamEvent::Envelope(envelope)) => {
                        msg_count += 1;
                        if msg_count <= 20 || msg_count % 100 == 0 {
                            println!(
                                "  [{:>4}] {:>5.1}s {}",
                                msg_count,
                                test_start.elapsed().as_secs_f64(),
                                envelope.key
                            );
                        }
                    }
                    Ok(UpstreamEvent::Ack { id }) => println!("  [ACK] control frame {}", id),
                    Ok(UpstreamEvent::Rejected { streams, message }) => {
                        println!("  [REJECTED] {:?}: {}", streams, message);
                    }
                    Ok(UpstreamEvent::Pong) => println!("  [PONG]"),
                    Ok(UpstreamEvent::Closed { reason }) => {
                        println!("  [CLOSE] {:?}", reason);
                        break;
                    }
                    Err(e) => {
                        println!("  [ERROR] {}", e);
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if let Err(e) = conn.ping().await {
                    println!("  [PING] Failed to send: {}", e);
                    break;
                }
            }
        }
    }

    conn.close().await;
    println!(
        "\nTest complete! Received {} messages in {:.1}s",
        msg_count,
        test_start.elapsed().as_secs_f64()
    );
}
