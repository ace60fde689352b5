use tokio::time::Instant;
use trackmaster::{DeviceEvent, DeviceModel, Result, Treadmill};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    info!("📊 Trackmaster Status Monitor Example");
    info!("Opening serial port {}...", port);

    let treadmill = match Treadmill::open(&port, DeviceModel::TrackMaster) {
        Ok(device) => {
            info!("✅ Connected ({} model)", device.model());
            device
        }
        Err(e) => {
            error!("❌ Failed to open port: {}", e);
            return Err(e);
        }
    };

    // Subscribe before starting so no event is missed
    let mut events = treadmill.subscribe();

    // Start the session; the status poll now requests readings every second
    treadmill.start().await?;

    info!("🔍 Monitoring device events...");
    info!("Press Ctrl+C to stop monitoring");

    let start_time = Instant::now();
    let mut max_speed = 0.0f32;
    let mut frames_seen = 0u64;

    while let Ok(event) = events.recv().await {
        match event {
            DeviceEvent::Changed(status) => {
                if status.speed > max_speed {
                    max_speed = status.speed;
                }

                let elapsed = start_time.elapsed();
                println!(
                    "[{:02}:{:02}] speed {:5.1}  elevation {:5.1}%  belt {}",
                    elapsed.as_secs() / 60,
                    elapsed.as_secs() % 60,
                    status.speed,
                    status.elevation,
                    status.belt
                );
            }
            DeviceEvent::DataExchanged => {
                frames_seen += 1;
            }
        }
    }

    println!("\n📊 Final Session Summary:");
    println!(
        "  Duration: {:02}:{:02}",
        start_time.elapsed().as_secs() / 60,
        start_time.elapsed().as_secs() % 60
    );
    println!("  Max Speed: {max_speed:.1}");
    println!("  Response frames: {frames_seen}");

    treadmill.stop().await?;
    info!("🎉 Status monitoring completed!");
    Ok(())
}
