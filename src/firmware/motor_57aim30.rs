use std::time;

use esp_idf_svc::hal::delay::TICK_RATE_HZ;
use esp_idf_svc::hal::delay::{Ets, FreeRtos, TickType_t};
use esp_idf_svc::hal::gpio::{self, AnyOutputPin};
use esp_idf_svc::hal::uart;

use anyhow::Result;
use fixedvec::FixedVec;
use ossm_stroke::motor::{Motor, TrapezoidMove};
use rmodbus::{client::ModbusRequest, guess_response_frame_len, ModbusProto};

const REG_MODBUS_ENABLE: u16 = 0x00;
const REG_ACCELERATION: u16 = 0x03;
const REG_BAUD_RATE: u16 = 0x03;
const REG_POSITION: u16 = 0x16;
const REG_MAX_POWER: u16 = 0x18;

/// Power and acceleration while feeling for the end stops.
const HOMING_POWER: u16 = 60;
const SERVO_ACCELERATION: u16 = 10000;
/// Kept clear of each end stop found while homing.
const END_STOP_MARGIN: i32 = 3000;

pub struct ModbusRTUMaster<'a> {
    uart: uart::UartDriver<'a>,
    ctrl_pin_driver: Option<gpio::PinDriver<'a, AnyOutputPin, gpio::Output>>,
    device_id: u8,
    read_timeout: TickType_t,
    write_timeout: TickType_t,
}

impl<'a> ModbusRTUMaster<'a> {
    pub fn new(
        uart: uart::UartDriver<'a>,
        ctrl_pin: Option<gpio::AnyOutputPin>,
        device_id: u8,
    ) -> Result<Self> {
        let ctrl_pin_driver = ctrl_pin.map(|pin| gpio::PinDriver::output(pin)).transpose()?;
        let timeout = Self::get_operation_timeout(uart.baudrate()?.into())?;
        Ok(Self {
            uart,
            ctrl_pin_driver,
            device_id,
            read_timeout: timeout,
            write_timeout: timeout,
        })
    }

    fn get_operation_timeout(baudrate: u32) -> Result<TickType_t> {
        match baudrate {
            9600 => Ok(TICK_RATE_HZ / 10),
            19200 => Ok(TICK_RATE_HZ / 20),
            38400 => Ok(TICK_RATE_HZ / 40),
            115200 | 115201 => Ok(TICK_RATE_HZ / 200),
            _ => Err(anyhow::anyhow!("Invalid baud rate: {}", baudrate)),
        }
    }

    fn uart_read_exactly(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut total_bytes_read = 0;
        while total_bytes_read < buf.len() {
            let bytes_read = self
                .uart
                .read(&mut buf[total_bytes_read..], self.read_timeout)?;
            if bytes_read == 0 {
                anyhow::bail!("Modbus response timed out");
            }
            total_bytes_read += bytes_read;
        }
        Ok(())
    }

    fn uart_write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut total_bytes_written = 0;
        while total_bytes_written < buf.len() {
            let bytes_written = self.uart.write(&buf[total_bytes_written..])?;
            total_bytes_written += bytes_written;
        }
        self.uart.wait_tx_done(self.write_timeout)?;
        Ok(())
    }

    fn modbus_request(&mut self, req: &[u8], resp: &mut [u8; 256]) -> Result<usize> {
        if let Some(ref mut ctrl_pin_driver) = self.ctrl_pin_driver {
            ctrl_pin_driver.set_high()?;
            Ets::delay_us(10);
        }

        self.uart_write_all(req)?;

        if let Some(ref mut ctrl_pin_driver) = self.ctrl_pin_driver {
            ctrl_pin_driver.set_low()?;
            Ets::delay_us(10);
        }

        self.uart_read_exactly(&mut resp[..6])?;
        let len = guess_response_frame_len(&resp[..6], ModbusProto::Rtu)? as usize;
        if len > resp.len() {
            anyhow::bail!("Modbus response too long: {} bytes", len);
        }
        if len > 6 {
            self.uart_read_exactly(&mut resp[6..len])?;
        }
        Ok(len)
    }

    pub fn read_holding_register(&mut self, addr: u16) -> Result<u16> {
        let mut result = [0u16];
        self.read_holding_registers(addr, &mut result)?;
        Ok(result[0])
    }

    pub fn read_holding_registers(&mut self, addr: u16, result: &mut [u16]) -> Result<()> {
        let mut request = ModbusRequest::new(self.device_id, ModbusProto::Rtu);
        let mut request_buf = fixedvec::alloc_stack!([u8; 256]);
        let mut response_buf = [0; 256];

        let mut frame_buf = FixedVec::new(&mut request_buf);

        request.generate_get_holdings(addr, result.len() as u16, &mut frame_buf)?;
        let len = self.modbus_request(frame_buf.as_slice(), &mut response_buf)?;

        let mut result_vec = FixedVec::new(result);
        request.parse_u16(&response_buf[..len], &mut result_vec)?;
        Ok(())
    }

    pub fn write_holding_register(&mut self, addr: u16, value: u16) -> Result<()> {
        let mut request = ModbusRequest::new(self.device_id, ModbusProto::Rtu);
        let mut request_buf = fixedvec::alloc_stack!([u8; 256]);
        let mut response_buf = [0; 256];

        let mut frame_buf = FixedVec::new(&mut request_buf);

        request.generate_set_holding(addr, value, &mut frame_buf)?;
        let len = self.modbus_request(frame_buf.as_slice(), &mut response_buf)?;

        request.parse_ok(&response_buf[..len])?;
        Ok(())
    }

    pub fn write_holding_registers(&mut self, addr: u16, values: &[u16]) -> Result<()> {
        let mut request = ModbusRequest::new(self.device_id, ModbusProto::Rtu);
        let mut request_buf = fixedvec::alloc_stack!([u8; 256]);
        let mut response_buf = [0; 256];

        let mut frame_buf = FixedVec::new(&mut request_buf);

        request.generate_set_holdings_bulk(addr, values, &mut frame_buf)?;
        let len = self.modbus_request(frame_buf.as_slice(), &mut response_buf)?;

        request.parse_ok(&response_buf[..len])?;
        Ok(())
    }

    pub fn set_baudrate(&mut self, baudrate: u32) -> Result<()> {
        self.uart.change_baudrate(baudrate)?;
        let timeout = Self::get_operation_timeout(baudrate)?;
        self.read_timeout = timeout;
        self.write_timeout = timeout;
        Ok(())
    }
}

#[derive(Debug)]
pub struct ModbusScanResult {
    pub baud_rate: u32,
    pub device_id: u8,
}

/// 57AIM30 closed loop servo on RS485. The servo only takes position
/// setpoints, so each move is streamed as a trapezoid from `cycle`.
pub struct Modbus57AIM30Motor<'a> {
    client: ModbusRTUMaster<'a>,
    pos_min: i32,
    pos_max: i32,
    /// Last position written to the servo.
    setpoint: i32,
    active_move: Option<(TrapezoidMove, time::Instant)>,
}

impl<'a> Modbus57AIM30Motor<'a> {
    pub fn new(modbus_client: ModbusRTUMaster<'a>) -> Self {
        Self {
            client: modbus_client,
            pos_min: 0,
            pos_max: 0,
            setpoint: 0,
            active_move: None,
        }
    }

    fn write_position_raw(&mut self, position: i32) -> Result<()> {
        let data = [position as u16, (position >> 16) as u16];
        self.client.write_holding_registers(REG_POSITION, &data)?;
        Ok(())
    }

    /// Writes a setpoint. The servo ignores 0, so 1 stands in for it.
    fn write_position(&mut self, position: i32) -> Result<()> {
        self.write_position_raw(if position == 0 { 1 } else { position })?;
        self.setpoint = position;
        Ok(())
    }

    fn set_acceleration(&mut self, acceleration: u16) -> Result<()> {
        self.client.write_holding_register(REG_ACCELERATION, acceleration)?;
        Ok(())
    }

    fn wait_stable_position(&mut self, timeout_ms: u32) -> Result<i32> {
        let start_time = time::Instant::now();
        let timeout = time::Duration::from_millis(timeout_ms as u64);
        let mut position = self.read_position()?;
        while start_time.elapsed() < timeout {
            let new_position = self.read_position()?;
            if (new_position - position).abs() < 10 {
                return Ok(new_position);
            }
            position = new_position;
            FreeRtos::delay_ms(100);
        }
        Err(anyhow::anyhow!("Timeout waiting for stable position"))
    }

    pub fn modbus_scan(&mut self) -> Result<ModbusScanResult> {
        let baud_rates: [u32; 4] = [115200, 9600, 19200, 38400];
        for baud_rate in baud_rates {
            self.client.set_baudrate(baud_rate)?;
            for device_id in 1..=247 {
                self.client.device_id = device_id;
                if self.client.read_holding_register(REG_MODBUS_ENABLE).is_ok() {
                    return Ok(ModbusScanResult {
                        baud_rate,
                        device_id,
                    });
                }
            }
        }
        Err(anyhow::anyhow!("no response"))
    }

    pub fn modbus_set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        let baud_rate_code = match baud_rate {
            9600 => 800,
            19200 => 801,
            38400 => 802,
            115200 => 803,
            _ => anyhow::bail!("Invalid baud rate: {}", baud_rate),
        };
        self.client.write_holding_register(REG_MODBUS_ENABLE, 1)?;
        self.client.write_holding_register(REG_BAUD_RATE, baud_rate_code)?;
        self.client.write_holding_register(0x04, 129)?;
        self.client.write_holding_register(REG_MODBUS_ENABLE, 506)?;
        Ok(())
    }

    pub fn enable_modbus_communication(&mut self) -> Result<()> {
        self.client.write_holding_register(REG_MODBUS_ENABLE, 0x01)?;
        Ok(())
    }
}

impl<'a> Motor for Modbus57AIM30Motor<'a> {
    fn read_position(&mut self) -> Result<i32> {
        let mut rsp = [0u16; 2];
        self.client.read_holding_registers(REG_POSITION, &mut rsp)?;
        let low = rsp[0];
        let high = rsp[1];
        Ok((high as i32) << 16 | low as i32)
    }

    fn move_to(&mut self, position: i32, speed: u32, acceleration: u32) -> Result<()> {
        if self.pos_max <= self.pos_min {
            anyhow::bail!("Motor not homed");
        }
        if position < self.pos_min || position > self.pos_max {
            anyhow::bail!(
                "Position {} outside of [{}, {}]",
                position,
                self.pos_min,
                self.pos_max
            );
        }
        let from = match &self.active_move {
            Some((mv, started)) => mv.position_at(started.elapsed()),
            None => self.setpoint,
        };
        self.active_move = Some((
            TrapezoidMove::new(from, position, speed, acceleration),
            time::Instant::now(),
        ));
        Ok(())
    }

    fn is_moving(&mut self) -> Result<bool> {
        Ok(self.active_move.is_some())
    }

    fn set_max_power(&mut self, power: u16) -> Result<()> {
        self.client.write_holding_register(REG_MAX_POWER, power)?;
        Ok(())
    }

    fn homing(&mut self) -> Result<()> {
        if self.pos_min != 0 || self.pos_max != 0 {
            anyhow::bail!("Motor already homed");
        }

        self.set_max_power(HOMING_POWER)?;
        self.set_acceleration(SERVO_ACCELERATION)?;
        self.write_position_raw(0)?;
        self.write_position(-1_000_000)?;
        FreeRtos::delay_ms(5000);
        self.pos_min = self.wait_stable_position(5000)? + END_STOP_MARGIN;

        self.write_position(1_000_000)?;
        FreeRtos::delay_ms(5000);
        self.pos_max = self.wait_stable_position(5000)? - END_STOP_MARGIN;

        self.write_position(self.pos_min)?;
        FreeRtos::delay_ms(5000);
        self.wait_stable_position(5000)?;

        log::info!("Homed, travel [{}, {}]", self.pos_min, self.pos_max);
        Ok(())
    }

    fn pos_min(&self) -> i32 {
        self.pos_min
    }

    fn pos_max(&self) -> i32 {
        self.pos_max
    }

    fn cycle(&mut self) -> Result<()> {
        let Some((mv, started)) = self.active_move else {
            return Ok(());
        };
        let elapsed = started.elapsed();
        let position = mv.position_at(elapsed);
        if position != self.setpoint {
            self.write_position(position)?;
        }
        if elapsed >= mv.duration() {
            self.active_move = None;
        }
        Ok(())
    }
}
