//! Terminal rendering for regsim

use std::collections::HashMap;

use colored::*;
use voltage_hal::{
    hex_dump, BitFieldValue, BusResult, CommunicationConfig, CommunicationStatistics,
    DeviceDataResult, DeviceEvent, DeviceInfo, RegisterMap,
};

pub fn print_result(operation: &str, result: &DeviceDataResult) {
    match result.error() {
        None => {
            let payload = if result.data().is_empty() {
                "-".to_string()
            } else {
                hex_dump(result.data())
            };
            println!(
                "{} {} 0x{:04X}: {} ({:?})",
                "OK".green().bold(),
                operation,
                result.address(),
                payload.bright_white(),
                result.elapsed()
            );
        },
        Some(failure) => println!(
            "{} {} 0x{:04X}: {} [{}]",
            "FAILED".red().bold(),
            operation,
            result.address(),
            failure.friendly_message(),
            failure
        ),
    }
}

pub fn print_event(event: &DeviceEvent) {
    let tag = match event {
        DeviceEvent::ConnectionStateChanged { .. } => event.name().bright_cyan(),
        DeviceEvent::DataReceived { .. } => event.name().dimmed(),
        DeviceEvent::CommunicationError { .. } => event.name().red(),
        DeviceEvent::Warning { .. } => event.name().yellow(),
        DeviceEvent::RegisterValueChanged { .. } => event.name().blue(),
    };
    println!(
        "{} {:<8} {}",
        event.timestamp().format("%H:%M:%S%.3f").to_string().dimmed(),
        tag,
        event
    );
}

pub fn print_reading(map: &RegisterMap, value: &BusResult<u16>) {
    match value {
        Ok(raw) => println!(
            "{:<12} {:>8.2} {} (raw {})",
            map.name.bold(),
            map.apply_scaling(*raw as f64),
            map.unit.as_deref().unwrap_or(""),
            raw
        ),
        Err(failure) => println!("{:<12} {}", map.name.bold(), failure.to_string().red()),
    }
}

pub fn print_fields(map: &RegisterMap, values: &HashMap<String, BitFieldValue>) {
    println!("{} 0x{:04X} {}", map.name.bold(), map.address, map.description.dimmed());

    let mut values: Vec<&BitFieldValue> = values.values().collect();
    values.sort_by_key(|v| v.field.bit_position);
    for value in values {
        let field = &value.field;
        let bits = if field.bit_width == 1 {
            format!("[{}]", field.bit_position)
        } else {
            format!("[{}:{}]", field.end_bit() - 1, field.bit_position)
        };
        println!(
            "  {:<14} {:<8} {:>6}  {}",
            field.name,
            bits.dimmed(),
            value.raw_value,
            value.description.bright_white()
        );
    }
}

pub fn print_info(info: &DeviceInfo, config: &CommunicationConfig) {
    println!("{}", "Device".bold());
    println!("  {:<18} {}", "id", info.id);
    println!("  {:<18} {}", "name", info.name);
    println!("  {:<18} {}", "type", info.device_type);
    println!("  {:<18} {}", "protocol", info.protocol);
    println!("  {:<18} 0x{:02X}", "address", info.address);
    println!("  {:<18} {}", "firmware", info.firmware_version);
    println!("  {:<18} {}", "hardware", info.hardware_revision);
    println!("  {:<18} {}", "registers", info.register_count);
    println!("  {:<18} {}", "capabilities", info.capabilities.join(", "));

    println!("{}", "Communication".bold());
    println!("  {:<18} {} Hz", "bus speed", config.bus_speed_hz);
    println!("  {:<18} {} ms", "timeout", config.timeout_ms);
    println!("  {:<18} {}", "retries", config.retry_count);
    println!("  {:<18} {:?}", "settings", config.settings);
}

pub fn print_statistics(stats: &CommunicationStatistics) {
    println!();
    println!("{}", "Statistics".bold());
    println!("  {:<18} {}", "transactions", stats.total_transactions);
    println!(
        "  {:<18} {}",
        "successful",
        stats.successful_transactions.to_string().green()
    );
    println!(
        "  {:<18} {}",
        "failed",
        if stats.failed_transactions > 0 {
            stats.failed_transactions.to_string().red()
        } else {
            stats.failed_transactions.to_string().normal()
        }
    );
    println!("  {:<18} {:.1}%", "success rate", stats.success_rate());
    println!("  {:<18} {} B", "sent", stats.bytes_sent);
    println!("  {:<18} {} B", "received", stats.bytes_received);
    match stats.min_response_time() {
        Some(min) => println!(
            "  {:<18} {:?} / {:?} / {:?}",
            "rt min/avg/max",
            min,
            stats.average_response_time(),
            stats.max_response_time
        ),
        None => println!("  {:<18} -", "rt min/avg/max"),
    }
}
