use std::sync::{Arc, Mutex};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::gpio::{AnyIOPin, AnyInputPin, AnyOutputPin};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::prelude::*;
use esp_idf_svc::hal::uart;
use esp_idf_svc::hal::uart::UART1;
use esp_idf_svc::hal::usb_serial;
use esp_idf_svc::http::server::EspHttpServer;
use esp_idf_svc::io::vfs::BlockingStdIo;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi};

use ossm_stroke::command::{run_console, DeviceCommand, PinRole};
use ossm_stroke::engine::{run_loop, StrokeEngine};
use ossm_stroke::settings::EngineConfig;

mod context;
mod http_api;
mod motor_57aim30;
mod storage;

use context::AppContext;
use motor_57aim30::{Modbus57AIM30Motor, ModbusRTUMaster};
use storage::{PinConfiguration, StorageManager};

const TARGET_BAUD_RATE: u32 = 115200;

pub fn main() {
    // It is necessary to call this function once. Otherwise, some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("OSSM stroke engine starting");

    if let Err(e) = run_app() {
        log::error!("App error: {}", e);
        loop {
            log::info!("System halted. Restarting in 10 seconds...");
            FreeRtos::delay_ms(10000);
        }
    }
}

fn run_app() -> anyhow::Result<()> {
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;
    let peripherals = Peripherals::take()?;
    let p = peripherals.pins;

    // setup stdin, note that pins are consumed here
    let all_pins = Arc::new(Mutex::new(vec![
        Some(p.gpio0.into()), Some(p.gpio1.into()), Some(p.gpio2.into()),
        Some(p.gpio3.into()), Some(p.gpio4.into()), Some(p.gpio5.into()),
        Some(p.gpio6.into()), Some(p.gpio7.into()), Some(p.gpio8.into()),
        Some(p.gpio9.into()), Some(p.gpio10.into()), Some(p.gpio11.into()),
        None, None, Some(p.gpio14.into()), // 12, 13 used for stdin
        Some(p.gpio15.into()), Some(p.gpio16.into()), Some(p.gpio17.into()),
        Some(p.gpio18.into()), Some(p.gpio19.into()), Some(p.gpio20.into()),
        Some(p.gpio21.into()), None, None, None, None, Some(p.gpio26.into()),
    ]));

    let usb_serial = usb_serial::UsbSerialDriver::new(
        peripherals.usb_serial,
        p.gpio12,
        p.gpio13,
        &usb_serial::config::Config::default(),
    )?;
    let _blocking_io = BlockingStdIo::usb_serial(usb_serial)?;

    let storage_manager = Arc::new(Mutex::new(Box::new(StorageManager::new(nvs)?)));

    let app_context = AppContext {
        storage_manager: storage_manager.clone(),
        engine: Arc::new(Mutex::new(None)),
        all_pins,
    };

    {
        let app_context = app_context.clone();
        std::thread::spawn(move || loop {
            let stdin = std::io::stdin();
            run_console(stdin.lock(), &app_context.engine, |cmd| {
                handle_device_command(&app_context, cmd)
            });
            FreeRtos::delay_ms(100);
        });
    }

    let mut wifi = EspWifi::new(peripherals.modem, sysloop.clone(), None)?;
    if let Err(e) = connect_wifi(&mut wifi, &storage_manager) {
        log::error!("Failed to connect to wifi: {}", e);
    }

    let mut server = EspHttpServer::new(&Default::default())?;
    http_api::register_handlers(&mut server, app_context.clone())?;

    if let Err(e) = run_engine(app_context, peripherals.uart1) {
        log::error!("Engine task failed: {}", e);
    }

    loop {
        FreeRtos::delay_ms(1000);
    }
}

fn handle_device_command(
    app_context: &AppContext,
    cmd: &DeviceCommand,
) -> anyhow::Result<Option<String>> {
    let mut sm = app_context.storage_manager.lock().unwrap();
    match cmd {
        DeviceCommand::SetWifiSsid(ssid) => {
            sm.set_ssid(ssid)?;
            Ok(Some(format!("SSID saved: {}, restart to apply", ssid)))
        }
        DeviceCommand::SetWifiPassword(password) => {
            sm.set_password(password)?;
            Ok(Some("Password saved, restart to apply".to_string()))
        }
        DeviceCommand::SetPin(role, pin) => {
            let mut config = sm.get_pin_configuration().unwrap_or_default();
            let name = match role {
                PinRole::ModbusTx => {
                    config.modbus_tx = *pin;
                    "Modbus TX"
                }
                PinRole::ModbusRx => {
                    config.modbus_rx = *pin;
                    "Modbus RX"
                }
                PinRole::ModbusDeRe => {
                    config.modbus_de_re = *pin;
                    "Modbus DE/RE"
                }
            };
            sm.set_pin_configuration(&config)?;
            Ok(Some(format!("{} pin set to {}, restart to apply", name, pin)))
        }
        DeviceCommand::GetPinConfiguration => {
            let config = sm.get_pin_configuration()?;
            Ok(Some(serde_json::to_string_pretty(&config)?))
        }
    }
}

fn connect_wifi(
    wifi: &mut EspWifi,
    storage_manager: &Arc<Mutex<Box<StorageManager>>>,
) -> anyhow::Result<()> {
    let (opt_ssid, opt_password) = {
        let storage_manager = storage_manager.lock().unwrap();
        (storage_manager.get_ssid(), storage_manager.get_password())
    };
    let (Ok(saved_ssid), Ok(saved_password)) = (opt_ssid, opt_password) else {
        log::info!("WiFi SSID or password not set. Please set them via console commands:\r\nset_wifi_ssid <your_ssid>\r\nset_wifi_password <your_password>");
        return Ok(());
    };
    if saved_ssid.is_empty() {
        log::info!("SSID is empty. Please set it via console command: set_wifi_ssid <your_ssid>");
        return Ok(());
    }

    let mut ssid = heapless::String::<32>::new();
    ssid.push_str(&saved_ssid)
        .map_err(|_| anyhow::anyhow!("SSID is too long"))?;
    let mut password = heapless::String::<64>::new();
    password
        .push_str(&saved_password)
        .map_err(|_| anyhow::anyhow!("Password is too long"))?;

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid,
        password,
        auth_method: AuthMethod::WPA2Personal,
        ..Default::default()
    }))?;

    wifi.start()?;
    wifi.connect()?;
    log::info!("WiFi connecting, SSID: {}", saved_ssid);
    while !wifi.is_up()? {
        FreeRtos::delay_ms(1);
    }
    log::info!("WiFi connected.");
    Ok(())
}

fn take_uart(app_context: &AppContext, uart_peripheral: UART1) -> anyhow::Result<uart::UartDriver<'static>> {
    let pin_config = app_context
        .storage_manager
        .lock()
        .unwrap()
        .get_pin_configuration()
        .unwrap_or_default();

    // the driver controls rts, which is wired to the rs485 transceiver's DE/~RE pin
    let config = uart::config::Config::default()
        .baudrate(Hertz(TARGET_BAUD_RATE))
        .mode(uart::config::Mode::RS485HalfDuplex);

    let mut all_pins = app_context.all_pins.lock().unwrap();
    let mut take = |num: u32| all_pins.get_mut(num as usize).and_then(|p| p.take());
    let configured = (
        take(pin_config.modbus_tx),
        take(pin_config.modbus_rx),
        take(pin_config.modbus_de_re),
    );

    let (tx, rx, rts) = match configured {
        (Some(tx), Some(rx), Some(rts)) => {
            log::info!(
                "Using configured pins for UART: tx={}, rx={}, rts={}",
                pin_config.modbus_tx,
                pin_config.modbus_rx,
                pin_config.modbus_de_re
            );
            (tx, rx, rts)
        }
        _ => {
            log::warn!("Failed to get configured pins, searching for available pins.");
            let mut free = all_pins
                .iter_mut()
                .enumerate()
                .filter_map(|(i, p)| p.take().map(|p| (i as u32, p)));
            let (Some((tx_num, tx)), Some((rx_num, rx)), Some((rts_num, rts))) =
                (free.next(), free.next(), free.next())
            else {
                anyhow::bail!("Not enough available pins for UART.");
            };
            log::info!("Found available pins for UART: tx={}, rx={}, rts={}", tx_num, rx_num, rts_num);

            app_context
                .storage_manager
                .lock()
                .unwrap()
                .set_pin_configuration(&PinConfiguration {
                    modbus_tx: tx_num,
                    modbus_rx: rx_num,
                    modbus_de_re: rts_num,
                })?;
            log::info!("Saved new pin configuration to NVS.");
            (tx, rx, rts)
        }
    };

    Ok(uart::UartDriver::new(
        uart_peripheral,
        <AnyIOPin as Into<AnyOutputPin>>::into(tx),
        <AnyIOPin as Into<AnyInputPin>>::into(rx),
        Option::<AnyIOPin>::None,
        Some(<AnyIOPin as Into<AnyOutputPin>>::into(rts)),
        &config,
    )?)
}

fn init_motor(app_context: &AppContext, uart_peripheral: UART1) -> anyhow::Result<Modbus57AIM30Motor<'static>> {
    let uart = take_uart(app_context, uart_peripheral)?;
    let modbus = ModbusRTUMaster::new(uart, Option::<AnyOutputPin>::None, 1)?;

    let mut motor = Modbus57AIM30Motor::new(modbus);
    if let Err(e) = motor.enable_modbus_communication() {
        log::info!("Failed to enable modbus, trying to scan and configure: {}", e);
        let scan = motor.modbus_scan().map_err(|e| {
            anyhow::anyhow!("Failed to scan motor device. Please check connection to the motor. {:?}", e)
        })?;
        log::info!("Motor device found, baud rate: {}, device id: {}", scan.baud_rate, scan.device_id);
        if scan.baud_rate != TARGET_BAUD_RATE {
            motor.modbus_set_baud_rate(TARGET_BAUD_RATE).map_err(|e| {
                anyhow::anyhow!("Failed to set baud rate to {}: {:?}", TARGET_BAUD_RATE, e)
            })?;
            log::info!("Motor baud rate set to {}, please power cycle the motor.", TARGET_BAUD_RATE);
        }
    }
    motor
        .enable_modbus_communication()
        .map_err(|e| anyhow::anyhow!("Failed to enable modbus communication: {:?}", e))?;
    Ok(motor)
}

fn load_config(app_context: &AppContext) -> anyhow::Result<EngineConfig> {
    let stored = app_context.storage_manager.lock().unwrap().get_engine_config();
    match stored {
        Ok(config) => {
            log::info!("Loaded engine config from NVS");
            Ok(config)
        }
        Err(_) => {
            log::info!("No engine config found in NVS, using default");
            let config = EngineConfig::default();
            app_context
                .storage_manager
                .lock()
                .unwrap()
                .set_engine_config(&config)?;
            Ok(config)
        }
    }
}

fn run_engine(app_context: AppContext, uart_peripheral: UART1) -> anyhow::Result<()> {
    let engine = (|| -> anyhow::Result<StrokeEngine<'static>> {
        let motor = init_motor(&app_context, uart_peripheral)?;
        let config = load_config(&app_context)?;
        let mut engine = StrokeEngine::new(Box::new(motor), config)?;
        engine
            .init_motor()
            .map_err(|e| anyhow::anyhow!("Failed to init motor: {:?}", e))?;
        Ok(engine)
    })();

    let engine = match engine {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("Failed to initialize motor: {}. Engine task will not run.", e);
            return Err(e);
        }
    };

    log::info!("Motor initialized, starting engine loop");
    *app_context.engine.lock().unwrap() = Some(Box::new(engine));

    let storage_manager = app_context.storage_manager.clone();
    run_loop(
        &app_context.engine,
        |config| storage_manager.lock().unwrap().set_engine_config(config),
        |_| true,
    )
}
