use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use ble_serial_bridge_lib::config::{AppConfig, CONFIG_FILE_NAME};
use ble_serial_bridge_lib::core::bluetooth::{AdapterState, PeripheralList, SinkEvent};
use ble_serial_bridge_lib::logging;
use ble_serial_bridge_lib::state::AppState;
use log::{info, warn};
use tokio::time::{sleep, timeout, Instant};

const ADAPTER_WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let config = AppConfig::load_config(&config_path).await?;
    logging::init(&config.log_level);
    info!("Using config {:?}: {:?}", config_path, config);

    let mut state = AppState::new(config).await?;
    let result = run(&mut state).await;
    state.shutdown().await?;
    result
}

async fn run(state: &mut AppState) -> Result<()> {
    wait_for_adapter(state).await?;

    let peripherals = scan(state).await?;
    println!("Discovered {} peripherals:", peripherals.len());
    for peripheral in peripherals.iter() {
        println!(
            "  {:>5} dBm  {:<24} {}",
            peripheral
                .rssi
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string()),
            peripheral.display_name(),
            peripheral.address().unwrap_or_else(|| peripheral.id.to_string()),
        );
    }

    let filter = &state.config.scan.name_filter;
    let target = peripherals
        .strongest_matching(filter)
        .cloned()
        .ok_or_else(|| anyhow!("No peripheral matching {:?} found", filter))?;

    state.bluetooth.connect(target.clone()).await?;
    loop {
        let event = tokio::select! {
            event = state.events.recv() => event.ok_or_else(|| anyhow!("Bluetooth manager stopped"))?,
            _ = tokio::signal::ctrl_c() => return Ok(()),
        };
        match event {
            SinkEvent::Ready(peripheral) => {
                println!("{} is ready", peripheral.display_name());
                break;
            }
            SinkEvent::ConnectFailed { reason, .. } => bail!("Connection failed: {}", reason),
            SinkEvent::ServiceNotFound(peripheral) => bail!(
                "{} does not expose {}",
                peripheral.display_name(),
                state.config.gatt.target_characteristic
            ),
            SinkEvent::Disconnected(_) => bail!("Link lost during setup"),
            _ => {}
        }
    }

    state.bluetooth.read_signal_strength().await?;
    info!("Waiting for serial data, press Ctrl-C to stop");
    loop {
        let event = tokio::select! {
            event = state.events.recv() => match event {
                Some(event) => event,
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        };
        match event {
            SinkEvent::BytesReceived { data, .. } => {
                print!("{}", String::from_utf8_lossy(&data));
            }
            SinkEvent::SignalStrength { rssi, .. } => println!("Signal strength: {} dBm", rssi),
            SinkEvent::NotifyFailed { reason, .. } => warn!("Notifications unavailable: {}", reason),
            SinkEvent::Disconnected(_) => {
                println!("Disconnected");
                return Ok(());
            }
            _ => {}
        }
    }
}

async fn wait_for_adapter(state: &AppState) -> Result<()> {
    let deadline = Instant::now() + ADAPTER_WAIT;
    loop {
        let status = state.bluetooth.status().await?;
        if status.adapter_state == AdapterState::PoweredOn {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("Bluetooth adapter is not ready: {:?}", status.adapter_state);
        }
        sleep(Duration::from_millis(100)).await;
    }
}

async fn scan(state: &mut AppState) -> Result<PeripheralList> {
    let duration = Duration::from_secs(state.config.scan.duration_secs);
    let mut peripherals = PeripheralList::new();

    state.bluetooth.start_scan().await?;
    let collect = async {
        while let Some(event) = state.events.recv().await {
            if let SinkEvent::Discovered { peripheral, rssi } = event {
                if state.config.scan.accepts_rssi(rssi) && peripherals.upsert(&peripheral, rssi) {
                    info!("Found {} ({:?} dBm)", peripheral.display_name(), rssi);
                }
            }
        }
    };
    // The scan window always ends by timing out.
    let _ = timeout(duration, collect).await;
    state.bluetooth.stop_scan().await?;

    Ok(peripherals)
}
