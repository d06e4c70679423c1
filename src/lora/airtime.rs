//! LoRa time-on-air calculation.
//!
//! Uses the formula from the SX1276 datasheet (section 4.1.1.7). The scheduler
//! uses it to check that each sender's packet fits inside its period.

use super::modem::ModemConfig;

/// Symbol time above which low data rate optimization is mandatory.
const LDRO_SYMBOL_THRESHOLD_US: u64 = 16_000;

/// Symbol duration in microseconds: `2^SF / BW`.
pub fn symbol_duration_us(config: &ModemConfig) -> u64 {
    let bw = config.bandwidth.hz() as u64;
    if bw == 0 {
        return 0;
    }
    (1u64 << config.spreading_factor.value()) * 1_000_000 / bw
}

/// Whether low data rate optimization must be enabled for `config`.
pub fn low_data_rate_optimize(config: &ModemConfig) -> bool {
    symbol_duration_us(config) > LDRO_SYMBOL_THRESHOLD_US
}

/// Packet airtime in microseconds for an explicit-header packet.
pub fn calculate_airtime_us(payload_bytes: usize, config: &ModemConfig) -> u64 {
    let sf = config.spreading_factor.value() as f64;
    let bw = config.bandwidth.hz() as f64;
    if bw == 0.0 {
        return 0;
    }

    let t_sym_us = (2.0_f64.powf(sf) / bw) * 1_000_000.0;
    let t_preamble_us = (config.preamble_length as f64 + 4.25) * t_sym_us;

    let de = if low_data_rate_optimize(config) {
        1.0
    } else {
        0.0
    };
    let crc_bits = if config.crc_enabled { 16.0 } else { 0.0 };

    // 8*PL - 4*SF + 28 + 16*CRC - 20*IH, explicit header so IH = 0
    let numerator = 8.0 * payload_bytes as f64 - 4.0 * sf + 28.0 + crc_bits;
    let denominator = 4.0 * (sf - 2.0 * de);

    let cr = config.coding_rate.denominator() as f64;
    let payload_symbols = if denominator > 0.0 {
        8.0 + (numerator / denominator).ceil().max(0.0) * cr
    } else {
        8.0
    };

    (t_preamble_us + payload_symbols * t_sym_us) as u64
}

/// Airtime in milliseconds.
pub fn calculate_airtime_ms(payload_bytes: usize, config: &ModemConfig) -> f64 {
    calculate_airtime_us(payload_bytes, config) as f64 / 1000.0
}
