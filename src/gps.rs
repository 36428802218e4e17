//! GPS fix decoding and the fast time source built on it.

use crate::types::{epoch_from_utc, Epoch};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

const MAX_SENTENCE_LEN: usize = 96;
/// Wait between polls of an idle receiver.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// A validated time, date and position reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub epoch: Epoch,
    pub lat: f64,
    pub lon: f64,
}

/// Byte-fed receiver decoder.
pub trait FixDecoder {
    fn feed(&mut self, byte: u8);

    /// True once time, date and location have all been updated since the
    /// last [`take_fix`](FixDecoder::take_fix).
    fn is_fix_ready(&self) -> bool;

    fn current_fix(&self) -> Option<Fix>;

    /// Return the ready fix and clear the update flags.
    fn take_fix(&mut self) -> Option<Fix>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct UtcTime {
    hour: u8,
    minute: u8,
    second: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct UtcDate {
    year: i32,
    month: u8,
    day: u8,
}

/// NMEA 0183 decoder for RMC and GGA sentences from any talker.
#[derive(Debug, Default)]
pub struct NmeaDecoder {
    buffer: String,
    in_sentence: bool,
    time: Option<UtcTime>,
    date: Option<UtcDate>,
    position: Option<(f64, f64)>,
    time_updated: bool,
    date_updated: bool,
    location_updated: bool,
    sentences_ok: u32,
    checksum_failures: u32,
}

impl NmeaDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sentences_ok(&self) -> u32 {
        self.sentences_ok
    }

    #[must_use]
    pub fn checksum_failures(&self) -> u32 {
        self.checksum_failures
    }

    fn finish_sentence(&mut self) {
        let sentence = std::mem::take(&mut self.buffer);
        let Some(body) = verify_checksum(&sentence) else {
            self.checksum_failures = self.checksum_failures.wrapping_add(1);
            return;
        };
        let fields: Vec<&str> = body.split(',').collect();
        let Some(kind) = fields.first().and_then(|t| t.get(2..)) else {
            return;
        };
        let accepted = match kind {
            "RMC" => self.apply_rmc(&fields),
            "GGA" => self.apply_gga(&fields),
            _ => false,
        };
        if accepted {
            self.sentences_ok = self.sentences_ok.wrapping_add(1);
        }
    }

    // $xxRMC,hhmmss.ss,A,llll.ll,a,yyyyy.yy,a,speed,course,ddmmyy,...
    fn apply_rmc(&mut self, fields: &[&str]) -> bool {
        if fields.len() < 10 || fields[2] != "A" {
            return false;
        }
        let (Some(time), Some(date), Some(position)) = (
            parse_time(fields[1]),
            parse_date(fields[9]),
            parse_position(fields[3], fields[4], fields[5], fields[6]),
        ) else {
            return false;
        };
        self.set_time(time);
        self.date = Some(date);
        self.date_updated = true;
        self.set_position(position);
        true
    }

    // $xxGGA,hhmmss.ss,llll.ll,a,yyyyy.yy,a,quality,...
    fn apply_gga(&mut self, fields: &[&str]) -> bool {
        if fields.len() < 7 || fields[6].parse::<u8>().map_or(true, |q| q == 0) {
            return false;
        }
        let (Some(time), Some(position)) = (
            parse_time(fields[1]),
            parse_position(fields[2], fields[3], fields[4], fields[5]),
        ) else {
            return false;
        };
        self.set_time(time);
        self.set_position(position);
        true
    }

    fn set_time(&mut self, time: UtcTime) {
        self.time = Some(time);
        self.time_updated = true;
    }

    fn set_position(&mut self, position: (f64, f64)) {
        self.position = Some(position);
        self.location_updated = true;
    }
}

impl FixDecoder for NmeaDecoder {
    fn feed(&mut self, byte: u8) {
        match byte {
            b'$' => {
                self.buffer.clear();
                self.in_sentence = true;
            }
            b'\r' | b'\n' => {
                if self.in_sentence {
                    self.in_sentence = false;
                    self.finish_sentence();
                }
            }
            _ if self.in_sentence => {
                if self.buffer.len() >= MAX_SENTENCE_LEN || !byte.is_ascii() {
                    self.buffer.clear();
                    self.in_sentence = false;
                } else {
                    self.buffer.push(byte as char);
                }
            }
            _ => {}
        }
    }

    fn is_fix_ready(&self) -> bool {
        self.time_updated && self.date_updated && self.location_updated
    }

    fn current_fix(&self) -> Option<Fix> {
        let (time, date, (lat, lon)) = (self.time?, self.date?, self.position?);
        Some(Fix {
            epoch: epoch_from_utc(date.year, date.month, date.day, time.hour, time.minute, time.second),
            lat,
            lon,
        })
    }

    fn take_fix(&mut self) -> Option<Fix> {
        if !self.is_fix_ready() {
            return None;
        }
        self.time_updated = false;
        self.date_updated = false;
        self.location_updated = false;
        self.current_fix()
    }
}

/// Strip `*hh` and check the XOR checksum. Sentences without one are rejected.
fn verify_checksum(sentence: &str) -> Option<&str> {
    let (body, checksum) = sentence.split_once('*')?;
    let expected = u8::from_str_radix(checksum.trim(), 16).ok()?;
    let actual = body.bytes().fold(0u8, |acc, b| acc ^ b);
    (actual == expected).then_some(body)
}

fn parse_time(field: &str) -> Option<UtcTime> {
    let digits = field.get(..6)?;
    let hour = digits.get(0..2)?.parse().ok()?;
    let minute = digits.get(2..4)?.parse().ok()?;
    let second = digits.get(4..6)?.parse().ok()?;
    (hour < 24 && minute < 60 && second < 61).then_some(UtcTime { hour, minute, second })
}

fn parse_date(field: &str) -> Option<UtcDate> {
    if field.len() != 6 {
        return None;
    }
    let day: u8 = field.get(0..2)?.parse().ok()?;
    let month: u8 = field.get(2..4)?.parse().ok()?;
    let year: i32 = field.get(4..6)?.parse().ok()?;
    ((1..=31).contains(&day) && (1..=12).contains(&month)).then_some(UtcDate {
        year: 2000 + year,
        month,
        day,
    })
}

/// `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere into signed decimal degrees.
fn parse_position(lat: &str, ns: &str, lon: &str, ew: &str) -> Option<(f64, f64)> {
    let lat = parse_degrees(lat, 2)?;
    let lon = parse_degrees(lon, 3)?;
    let lat = match ns {
        "N" => lat,
        "S" => -lat,
        _ => return None,
    };
    let lon = match ew {
        "E" => lon,
        "W" => -lon,
        _ => return None,
    };
    Some((lat, lon))
}

fn parse_degrees(field: &str, degree_digits: usize) -> Option<f64> {
    let degrees: f64 = field.get(..degree_digits)?.parse().ok()?;
    let minutes: f64 = field.get(degree_digits..)?.parse().ok()?;
    (minutes < 60.0).then_some(degrees + minutes / 60.0)
}

/// The fast tier of the time-sync chain.
#[allow(async_fn_in_trait)]
pub trait FastTimeSource {
    /// Wait up to `timeout` for a complete fix. `None` on timeout or when no
    /// receiver is attached.
    async fn acquire_fix(&mut self, timeout: Duration) -> Option<Fix>;
}

/// Placeholder when no receiver is configured; always reports no fix.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGps;

impl FastTimeSource for NoGps {
    async fn acquire_fix(&mut self, _timeout: Duration) -> Option<Fix> {
        None
    }
}

/// Receiver byte stream plus decoder.
#[derive(Debug)]
pub struct GpsTimeSource<R, D> {
    reader: R,
    decoder: D,
}

impl<R, D> GpsTimeSource<R, D>
where
    R: AsyncRead + Unpin,
    D: FixDecoder,
{
    pub fn new(reader: R, decoder: D) -> Self {
        Self { reader, decoder }
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }
}

impl<R, D> FastTimeSource for GpsTimeSource<R, D>
where
    R: AsyncRead + Unpin,
    D: FixDecoder,
{
    async fn acquire_fix(&mut self, timeout: Duration) -> Option<Fix> {
        let deadline = Instant::now() + timeout;
        // Anything decoded before this window does not count.
        let _ = self.decoder.take_fix();
        let mut buf = [0u8; 64];
        loop {
            match timeout_at(deadline, self.reader.read(&mut buf)).await {
                Err(_) => return None,
                Ok(Ok(0)) => {
                    if Instant::now() + IDLE_POLL >= deadline {
                        return None;
                    }
                    tokio::time::sleep(IDLE_POLL).await;
                }
                Ok(Ok(n)) => {
                    for &byte in &buf[..n] {
                        self.decoder.feed(byte);
                    }
                    if let Some(fix) = self.decoder.take_fix() {
                        debug!(epoch = fix.epoch, "GPS fix acquired");
                        return Some(fix);
                    }
                }
                Ok(Err(e)) => {
                    warn!("GPS read failed: {}", e);
                    return None;
                }
            }
        }
    }
}
