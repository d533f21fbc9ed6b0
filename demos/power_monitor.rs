use nadproto::ClientOptions;
use simple_logger::SimpleLogger;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Enable logging
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let host = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "192.168.1.50".to_string());

    // Connect and print what the receiver is doing.
    let client = ClientOptions::new().name("receiver").open(&host)?;
    println!(
        "{} (firmware {}): power {}, volume {}, source {}",
        client.get_model()?,
        client.get_version()?,
        if client.get_power()? { "on" } else { "off" },
        client.get_volume()?,
        client.get_source()?,
    );

    // Report power changes made with the remote or the front panel for a minute.
    client.start_power_monitoring(|on| {
        println!("power turned {}", if on { "on" } else { "off" });
    })?;
    std::thread::sleep(Duration::from_secs(60));
    client.stop_power_monitoring();
    Ok(())
}
