/// Bytes in one binary gigabyte (GiB). Provider price lists quote "GB" but
/// bill in 1024^3 units.
pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub fn bytes_to_gb(bytes: i64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

pub fn gb_to_bytes(gb: f64) -> i64 {
    (gb * BYTES_PER_GB).round() as i64
}
