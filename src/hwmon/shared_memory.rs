// Shared-memory sensor reader
//
// Reads CPU temperature from the sensor table an external monitoring tool
// publishes in a named shared-memory segment. The layout is packed and
// little-endian:
//
//   header    signature, version, revision, poll time, then offset/size/count
//             for the sensor table and for the reading table
//   sensor    id, instance, original name [128], user name [128]
//   reading   type, sensor index, id, original label [128], user label [128],
//             unit [16], value, min, max, avg (f64)
//
// Discovery runs once when the segment is opened and caches the index of the
// best CPU temperature reading. Each read re-checks the live header, then
// decodes only that one record.

use std::fmt;

/// Name of the segment the sensor publisher creates
pub const SHARED_MEMORY_NAME: &str = "Global\\HWiNFO_SENS_SM2";

/// "HWiS" read as a little-endian u32
pub const SIGNATURE: u32 = 0x5369_5748;

pub const HEADER_SIZE: usize = 44;
pub const SENSOR_RECORD_SIZE: usize = 264;
pub const READING_RECORD_SIZE: usize = 316;

const NAME_LEN: usize = 128;
const UNIT_LEN: usize = 16;

const MAX_PLAUSIBLE_TEMP: f64 = 150.0;

const CPU_SENSOR_MARKERS: &[&str] = &["cpu", "intel", "ryzen", "amd", "processor"];
const CPU_LABEL_MARKERS: &[&str] = &["package", "tctl", "tdie", "cpu"];

/// A readable view of the shared-memory segment
pub trait SensorSegment {
    /// Size of the readable region in bytes
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `buf.len()` bytes starting at `offset`; `false` if out of range
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> bool;
}

impl SensorSegment for Vec<u8> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> bool {
        match offset.checked_add(buf.len()) {
            Some(end) if end <= self.as_slice().len() => {
                buf.copy_from_slice(&self[offset..end]);
                true
            }
            _ => false,
        }
    }
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn i64_at(bytes: &[u8], offset: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    i64::from_le_bytes(raw)
}

fn f64_at(bytes: &[u8], offset: usize) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    f64::from_le_bytes(raw)
}

fn str_at(bytes: &[u8], offset: usize, len: usize) -> String {
    let field = &bytes[offset..offset + len];
    let end = field.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&field[..end]).trim().to_string()
}

/// Segment header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub signature: u32,
    pub version: u32,
    pub revision: u32,
    pub poll_time: i64,
    pub sensor_offset: u32,
    pub sensor_size: u32,
    pub sensor_count: u32,
    pub reading_offset: u32,
    pub reading_size: u32,
    pub reading_count: u32,
}

impl Header {
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            signature: u32_at(bytes, 0),
            version: u32_at(bytes, 4),
            revision: u32_at(bytes, 8),
            poll_time: i64_at(bytes, 12),
            sensor_offset: u32_at(bytes, 20),
            sensor_size: u32_at(bytes, 24),
            sensor_count: u32_at(bytes, 28),
            reading_offset: u32_at(bytes, 32),
            reading_size: u32_at(bytes, 36),
            reading_count: u32_at(bytes, 40),
        }
    }

    fn read(segment: &dyn SensorSegment) -> Option<Self> {
        let mut raw = [0u8; HEADER_SIZE];
        segment.read_at(0, &mut raw).then(|| Self::parse(&raw))
    }

    pub fn is_valid(&self) -> bool {
        self.signature == SIGNATURE
            && self.sensor_size as usize >= SENSOR_RECORD_SIZE
            && self.reading_size as usize >= READING_RECORD_SIZE
    }

    fn sensor_offset_of(&self, index: u32) -> usize {
        self.sensor_offset as usize + index as usize * self.sensor_size as usize
    }

    fn reading_offset_of(&self, index: u32) -> usize {
        self.reading_offset as usize + index as usize * self.reading_size as usize
    }

    /// Sensor records that fit inside a segment of `len` bytes
    fn sensors_within(&self, len: usize) -> u32 {
        records_within(self.sensor_offset, self.sensor_size, self.sensor_count, len)
    }

    /// Reading records that fit inside a segment of `len` bytes
    fn readings_within(&self, len: usize) -> u32 {
        records_within(self.reading_offset, self.reading_size, self.reading_count, len)
    }
}

fn records_within(offset: u32, stride: u32, count: u32, len: usize) -> u32 {
    let (offset, stride) = (offset as usize, stride as usize);
    if stride == 0 || offset >= len {
        return 0;
    }
    let fit = (len - offset) / stride;
    count.min(u32::try_from(fit).unwrap_or(u32::MAX))
}

/// Reading category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingType {
    None,
    Temperature,
    Voltage,
    Fan,
    Current,
    Power,
    Clock,
    Usage,
    Other,
}

impl From<u32> for ReadingType {
    fn from(raw: u32) -> Self {
        match raw {
            1 => ReadingType::Temperature,
            2 => ReadingType::Voltage,
            3 => ReadingType::Fan,
            4 => ReadingType::Current,
            5 => ReadingType::Power,
            6 => ReadingType::Clock,
            7 => ReadingType::Usage,
            0 => ReadingType::None,
            _ => ReadingType::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorRecord {
    pub id: u32,
    pub instance: u32,
    pub name_original: String,
    pub name_user: String,
}

impl SensorRecord {
    pub fn parse(bytes: &[u8; SENSOR_RECORD_SIZE]) -> Self {
        Self {
            id: u32_at(bytes, 0),
            instance: u32_at(bytes, 4),
            name_original: str_at(bytes, 8, NAME_LEN),
            name_user: str_at(bytes, 8 + NAME_LEN, NAME_LEN),
        }
    }

    fn is_cpu_like(&self) -> bool {
        let name = format!("{} {}", self.name_original, self.name_user).to_lowercase();
        CPU_SENSOR_MARKERS.iter().any(|m| name.contains(m))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadingRecord {
    pub reading_type: ReadingType,
    pub sensor_index: u32,
    pub reading_id: u32,
    pub label_original: String,
    pub label_user: String,
    pub unit: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl ReadingRecord {
    pub fn parse(bytes: &[u8; READING_RECORD_SIZE]) -> Self {
        Self {
            reading_type: ReadingType::from(u32_at(bytes, 0)),
            sensor_index: u32_at(bytes, 4),
            reading_id: u32_at(bytes, 8),
            label_original: str_at(bytes, 12, NAME_LEN),
            label_user: str_at(bytes, 12 + NAME_LEN, NAME_LEN),
            unit: str_at(bytes, 12 + 2 * NAME_LEN, UNIT_LEN),
            value: f64_at(bytes, 284),
            min: f64_at(bytes, 292),
            max: f64_at(bytes, 300),
            avg: f64_at(bytes, 308),
        }
    }

    fn label(&self) -> &str {
        if self.label_user.is_empty() {
            &self.label_original
        } else {
            &self.label_user
        }
    }

    fn is_plausible_temperature(&self) -> bool {
        self.reading_type == ReadingType::Temperature
            && self.value > 0.0
            && self.value < MAX_PLAUSIBLE_TEMP
    }
}

fn is_cpu_temperature_label(label: &str) -> bool {
    let label = label.to_lowercase();
    CPU_LABEL_MARKERS.iter().any(|m| label.contains(m))
        || (label.contains("core") && !label.contains("distance"))
}

fn read_sensor(segment: &dyn SensorSegment, header: &Header, index: u32) -> Option<SensorRecord> {
    let mut raw = [0u8; SENSOR_RECORD_SIZE];
    segment
        .read_at(header.sensor_offset_of(index), &mut raw)
        .then(|| SensorRecord::parse(&raw))
}

fn read_reading(segment: &dyn SensorSegment, header: &Header, index: u32) -> Option<ReadingRecord> {
    let mut raw = [0u8; READING_RECORD_SIZE];
    segment
        .read_at(header.reading_offset_of(index), &mut raw)
        .then(|| ReadingRecord::parse(&raw))
}

/// CPU temperature reader over the shared-memory sensor table
pub struct SharedMemorySensorReader {
    segment: Option<Box<dyn SensorSegment>>,
    reading_index: Option<u32>,
    available: bool,
}

impl fmt::Debug for SharedMemorySensorReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemorySensorReader")
            .field("available", &self.available)
            .field("reading_index", &self.reading_index)
            .finish()
    }
}

impl SharedMemorySensorReader {
    /// Open the system segment; `None` when no publisher is running
    pub fn open() -> Option<Self> {
        let segment = crate::platform::open_sensor_segment(SHARED_MEMORY_NAME)?;
        Some(Self::from_segment(segment))
    }

    /// Validate the header and discover the CPU temperature reading
    pub fn from_segment(segment: Box<dyn SensorSegment>) -> Self {
        let mut reader = Self {
            segment: Some(segment),
            reading_index: None,
            available: false,
        };
        reader.rediscover();
        reader
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Cached index of the chosen reading
    pub fn reading_index(&self) -> Option<u32> {
        self.reading_index
    }

    /// Re-validate the header and rebuild the cached reading index
    pub fn rediscover(&mut self) -> bool {
        self.available = false;
        self.reading_index = None;

        let Some(segment) = self.segment.as_deref() else {
            return false;
        };
        let Some(header) = Header::read(segment) else {
            log::debug!("Sensor segment too small for a header");
            return false;
        };
        if header.signature != SIGNATURE {
            log::info!(
                "Sensor segment signature mismatch: {:#010x}",
                header.signature
            );
            return false;
        }
        if !header.is_valid() {
            log::info!(
                "Sensor segment record sizes unsupported ({} / {})",
                header.sensor_size,
                header.reading_size
            );
            return false;
        }

        self.available = true;
        self.reading_index = discover_cpu_reading(segment, &header);
        match self.reading_index {
            Some(index) => log::info!("Shared-memory CPU temperature at reading {}", index),
            None => log::debug!("No CPU temperature reading in shared memory"),
        }
        self.reading_index.is_some()
    }

    /// Current value of the cached reading, if still plausible
    pub fn get_cpu_temperature(&self) -> Option<f32> {
        if !self.available {
            return None;
        }
        let segment = self.segment.as_deref()?;
        let index = self.reading_index?;

        let header = Header::read(segment).filter(Header::is_valid)?;
        if index >= header.reading_count {
            log::debug!("Cached reading {} beyond table of {}", index, header.reading_count);
            return None;
        }

        let reading = read_reading(segment, &header, index)?;
        reading
            .is_plausible_temperature()
            .then_some(reading.value as f32)
    }

    /// Unmap the segment. Safe to call more than once.
    pub fn close(&mut self) {
        if self.segment.take().is_some() {
            log::debug!("Sensor segment closed");
        }
        self.available = false;
        self.reading_index = None;
    }
}

fn discover_cpu_reading(segment: &dyn SensorSegment, header: &Header) -> Option<u32> {
    let sensor_count = header.sensors_within(segment.len());
    let reading_count = header.readings_within(segment.len());
    if sensor_count < header.sensor_count || reading_count < header.reading_count {
        log::debug!(
            "Sensor header claims {} sensors and {} readings, segment holds {} and {}",
            header.sensor_count,
            header.reading_count,
            sensor_count,
            reading_count
        );
    }

    for index in 0..sensor_count {
        let Some(sensor) = read_sensor(segment, header, index) else {
            break;
        };
        if sensor.is_cpu_like() {
            log::debug!("CPU-like sensor {}: {}", index, sensor.name_original);
        }
    }

    let mut best = None;
    for index in 0..reading_count {
        let Some(reading) = read_reading(segment, header, index) else {
            break;
        };
        if reading.reading_type != ReadingType::Temperature || reading.sensor_index >= sensor_count {
            continue;
        }

        let is_cpu_sensor = read_sensor(segment, header, reading.sensor_index)
            .map(|sensor| sensor.is_cpu_like())
            .unwrap_or(false);
        if !is_cpu_sensor
            || !is_cpu_temperature_label(reading.label())
            || !reading.is_plausible_temperature()
        {
            continue;
        }

        if reading.label().to_lowercase().contains("package") {
            return Some(index);
        }
        if best.is_none() {
            best = Some(index);
        }
    }
    best
}
