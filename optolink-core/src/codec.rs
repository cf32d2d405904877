//! Value codec: raw payload bytes to typed values and back
//!
//! Both directions are pure functions of the bytes (or value) and the
//! [`CommandSpec`]. Encode failures are reported before anything is sent.

use crate::command::{ByteOrder, CommandSpec, DataType};
use crate::datatypes::{TimerSchedule, TypedValue};
use crate::error::{OptolinkError, OptolinkResult};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Decode a payload read from the device
///
/// # Arguments
///
/// * `bytes` - Payload exactly `spec.length` bytes long
/// * `spec` - Definition of the data point
///
/// # Returns
///
/// The typed value, or `InvalidData` if the bytes do not fit the type
pub fn decode(bytes: &[u8], spec: &CommandSpec) -> OptolinkResult<TypedValue> {
    if bytes.len() != spec.length {
        return Err(OptolinkError::InvalidData(format!(
            "{}: expected {} bytes, got {}",
            spec.name,
            spec.length,
            bytes.len()
        )));
    }
    let format = &spec.format;
    let value = match format.data_type {
        DataType::Integer => TypedValue::Integer(read_int(bytes, spec)?),
        DataType::Scaled => TypedValue::Number(read_int(bytes, spec)? as f64 / format.scale),
        DataType::Boolean => TypedValue::Boolean(bytes.iter().any(|&b| b != 0)),
        DataType::String => TypedValue::Text(decode_text(bytes)),
        DataType::TimerSchedule => {
            TypedValue::Schedule(TimerSchedule::decode(bytes, format.timer_encoding)?)
        }
        DataType::Enumeration => {
            let raw = read_int(bytes, spec)?;
            match format.labels.get(&raw) {
                Some(label) => TypedValue::Text(label.clone()),
                None => TypedValue::Integer(raw),
            }
        }
        DataType::DateTime => TypedValue::DateTime(decode_datetime(bytes)?),
        DataType::Date => TypedValue::Date(decode_datetime(bytes)?.date()),
        DataType::SerialNumber => TypedValue::Text(decode_serial_number(bytes)?),
        DataType::Raw => TypedValue::Raw(bytes.to_vec()),
    };
    Ok(value)
}

/// Encode a value for writing to the device
///
/// # Returns
///
/// Exactly `spec.length` bytes, or one of `ValueOutOfRange`, `ValueTooLong`,
/// `InvalidSchedule` or `InvalidData`
pub fn encode(value: &TypedValue, spec: &CommandSpec) -> OptolinkResult<Vec<u8>> {
    let format = &spec.format;
    match (format.data_type, value) {
        (DataType::Integer, _) => {
            let raw = integral(value, spec)?;
            check_bounds(raw as f64, spec)?;
            write_int(raw, spec)
        }
        (DataType::Scaled, _) => {
            let number = numeric(value, spec)?;
            check_bounds(number, spec)?;
            let raw = (number * format.scale).round();
            if !raw.is_finite() {
                return Err(OptolinkError::ValueOutOfRange(format!("{}: {}", spec.name, number)));
            }
            write_int(raw as i128, spec)
        }
        (DataType::Boolean, _) => {
            let flag = value.as_bool().ok_or_else(|| mismatch(value, spec))?;
            write_int(flag as i128, spec)
        }
        (DataType::Enumeration, TypedValue::Text(label)) => {
            let raw = format
                .labels
                .iter()
                .find(|(_, candidate)| candidate.eq_ignore_ascii_case(label))
                .map(|(&raw, _)| raw)
                .ok_or_else(|| {
                    OptolinkError::ValueOutOfRange(format!("{}: unknown label {}", spec.name, label))
                })?;
            write_int(raw as i128, spec)
        }
        (DataType::Enumeration, TypedValue::Integer(raw)) => {
            check_bounds(*raw as f64, spec)?;
            write_int(*raw as i128, spec)
        }
        (DataType::String, TypedValue::Text(text)) => encode_text(text, spec),
        (DataType::TimerSchedule, TypedValue::Schedule(schedule)) => {
            Ok(schedule.encode(format.timer_encoding)?.to_vec())
        }
        (DataType::DateTime, TypedValue::DateTime(datetime)) => Ok(encode_datetime(datetime).to_vec()),
        (DataType::Date, TypedValue::Date(date)) => Ok(encode_datetime(&date.and_time(NaiveTime::MIN)).to_vec()),
        (DataType::Raw, TypedValue::Raw(bytes)) => {
            if bytes.len() != spec.length {
                return Err(OptolinkError::ValueTooLong(format!(
                    "{}: expected {} bytes, got {}",
                    spec.name,
                    spec.length,
                    bytes.len()
                )));
            }
            Ok(bytes.clone())
        }
        _ => Err(mismatch(value, spec)),
    }
}

fn mismatch(value: &TypedValue, spec: &CommandSpec) -> OptolinkError {
    OptolinkError::InvalidData(format!(
        "{}: cannot encode {} value as {}",
        spec.name,
        value.kind(),
        spec.format.data_type.as_str()
    ))
}

fn numeric(value: &TypedValue, spec: &CommandSpec) -> OptolinkResult<f64> {
    let number = value.as_f64().ok_or_else(|| mismatch(value, spec))?;
    if !number.is_finite() {
        return Err(OptolinkError::ValueOutOfRange(format!("{}: {}", spec.name, number)));
    }
    Ok(number)
}

/// Exact integer view of a value; fractional numbers are rejected
fn integral(value: &TypedValue, spec: &CommandSpec) -> OptolinkResult<i128> {
    match value {
        TypedValue::Integer(v) => Ok(*v as i128),
        TypedValue::Boolean(v) => Ok(*v as i128),
        _ => {
            let number = numeric(value, spec)?;
            if number.fract() != 0.0 {
                return Err(OptolinkError::ValueOutOfRange(format!(
                    "{}: {} is not an integer",
                    spec.name, number
                )));
            }
            Ok(number as i128)
        }
    }
}

fn check_bounds(number: f64, spec: &CommandSpec) -> OptolinkResult<()> {
    let format = &spec.format;
    let below = format.min_value.is_some_and(|min| number < min);
    let above = format.max_value.is_some_and(|max| number > max);
    if below || above {
        return Err(OptolinkError::ValueOutOfRange(format!(
            "{}: {} outside [{}, {}]",
            spec.name,
            number,
            format.min_value.map_or("-inf".to_string(), |v| v.to_string()),
            format.max_value.map_or("inf".to_string(), |v| v.to_string()),
        )));
    }
    Ok(())
}

/// Inclusive integer range representable in `length` bytes
fn int_range(length: usize, signed: bool) -> (i128, i128) {
    let bits = (length * 8) as u32;
    if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        // decoded integers are i64, so unsigned 8 byte values stop at i64::MAX
        (0, ((1i128 << bits) - 1).min(i64::MAX as i128))
    }
}

fn read_int(bytes: &[u8], spec: &CommandSpec) -> OptolinkResult<i64> {
    let format = &spec.format;
    let shift_in = |acc: u64, b: &u8| (acc << 8) | *b as u64;
    let raw = match format.byte_order {
        ByteOrder::BigEndian => bytes.iter().fold(0, shift_in),
        ByteOrder::LittleEndian => bytes.iter().rev().fold(0, shift_in),
    };
    let bits = bytes.len() * 8;
    if format.signed {
        if bits < 64 && raw & (1 << (bits - 1)) != 0 {
            return Ok((raw | (u64::MAX << bits)) as i64);
        }
        return Ok(raw as i64);
    }
    i64::try_from(raw).map_err(|_| {
        OptolinkError::InvalidData(format!(
            "{}: unsigned value {} exceeds the integer range",
            spec.name, raw
        ))
    })
}

fn write_int(raw: i128, spec: &CommandSpec) -> OptolinkResult<Vec<u8>> {
    let (min, max) = int_range(spec.length, spec.format.signed);
    if raw < min || raw > max {
        return Err(OptolinkError::ValueOutOfRange(format!(
            "{}: raw value {} does not fit {} {} byte(s)",
            spec.name,
            raw,
            if spec.format.signed { "signed" } else { "unsigned" },
            spec.length
        )));
    }
    let le = (raw as u64).to_le_bytes();
    let mut bytes = le[..spec.length].to_vec();
    if spec.format.byte_order == ByteOrder::BigEndian {
        bytes.reverse();
    }
    Ok(bytes)
}

fn decode_text(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|&b| b != 0x00 && b != 0x20)
        .map_or(0, |index| index + 1);
    bytes[..end].iter().map(|&b| b as char).collect()
}

fn encode_text(text: &str, spec: &CommandSpec) -> OptolinkResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(spec.length);
    for c in text.chars() {
        let code = c as u32;
        if code > 0xFF {
            return Err(OptolinkError::InvalidData(format!(
                "{}: character {:?} is not representable",
                spec.name, c
            )));
        }
        bytes.push(code as u8);
    }
    if bytes.len() > spec.length {
        return Err(OptolinkError::ValueTooLong(format!(
            "{}: {} characters exceed {} bytes",
            spec.name,
            bytes.len(),
            spec.length
        )));
    }
    bytes.resize(spec.length, 0x00);
    Ok(bytes)
}

fn from_bcd(byte: u8) -> OptolinkResult<u32> {
    let (high, low) = (byte >> 4, byte & 0x0F);
    if high > 9 || low > 9 {
        return Err(OptolinkError::InvalidData(format!("Invalid BCD byte 0x{:02X}", byte)));
    }
    Ok(high as u32 * 10 + low as u32)
}

fn to_bcd(value: u32) -> u8 {
    (((value / 10) % 10) << 4 | (value % 10)) as u8
}

/// `YY YY MM DD 0W HH MM SS`, weekday counted from Sunday = 0
fn decode_datetime(bytes: &[u8]) -> OptolinkResult<NaiveDateTime> {
    let year = from_bcd(bytes[0])? * 100 + from_bcd(bytes[1])?;
    let month = from_bcd(bytes[2])?;
    let day = from_bcd(bytes[3])?;
    let hour = from_bcd(bytes[5])?;
    let minute = from_bcd(bytes[6])?;
    let second = from_bcd(bytes[7])?;
    NaiveDate::from_ymd_opt(year as i32, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .ok_or_else(|| {
            OptolinkError::InvalidData(format!(
                "Invalid system time {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ))
        })
}

fn encode_datetime(datetime: &NaiveDateTime) -> [u8; 8] {
    let year = datetime.year().clamp(0, 9999) as u32;
    [
        to_bcd(year / 100),
        to_bcd(year % 100),
        to_bcd(datetime.month()),
        to_bcd(datetime.day()),
        to_bcd(datetime.weekday().num_days_from_sunday()),
        to_bcd(datetime.hour()),
        to_bcd(datetime.minute()),
        to_bcd(datetime.second()),
    ]
}

/// ASCII decimal digits, reported as upper-case hex text (`0X...`)
fn decode_serial_number(bytes: &[u8]) -> OptolinkResult<String> {
    let mut number: u64 = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return Err(OptolinkError::InvalidData(format!(
                "Serial number byte 0x{:02X} is not a digit",
                byte
            )));
        }
        number = number * 10 + u64::from(byte - b'0');
    }
    Ok(format!("0X{:X}", number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ValueFormat;
    use crate::datatypes::{SwitchingPair, TimerEncoding};

    fn spec(length: usize, format: ValueFormat) -> CommandSpec {
        CommandSpec::new("test", 0x2323, length, format).unwrap()
    }

    #[test]
    fn test_scaled_number_scenario() {
        let spec = spec(2, ValueFormat::scaled(10.0).with_signed(true));
        assert_eq!(decode(&[0x00, 0xE1], &spec).unwrap(), TypedValue::Number(22.5));
        assert_eq!(encode(&TypedValue::Number(22.5), &spec).unwrap(), vec![0x00, 0xE1]);
    }

    #[test]
    fn test_signed_negative() {
        let spec = spec(2, ValueFormat::scaled(10.0).with_signed(true));
        // -5.5 degrees
        assert_eq!(decode(&[0xFF, 0xC9], &spec).unwrap(), TypedValue::Number(-5.5));
        assert_eq!(encode(&TypedValue::Number(-5.5), &spec).unwrap(), vec![0xFF, 0xC9]);
    }

    #[test]
    fn test_little_endian() {
        let format = ValueFormat::default().with_byte_order(ByteOrder::LittleEndian);
        let spec = spec(4, format);
        assert_eq!(decode(&[0x10, 0x27, 0x00, 0x00], &spec).unwrap(), TypedValue::Integer(10000));
        assert_eq!(encode(&TypedValue::Integer(10000), &spec).unwrap(), vec![0x10, 0x27, 0x00, 0x00]);
    }

    #[test]
    fn test_scaled_rounds_to_nearest() {
        let spec = spec(2, ValueFormat::scaled(10.0));
        assert_eq!(encode(&TypedValue::Number(22.44), &spec).unwrap(), vec![0x00, 0xE0]);
        assert_eq!(encode(&TypedValue::Integer(3), &spec).unwrap(), vec![0x00, 0x1E]);
    }

    #[test]
    fn test_integer_out_of_range() {
        let unsigned = spec(1, ValueFormat::default());
        assert!(matches!(
            encode(&TypedValue::Integer(256), &unsigned),
            Err(OptolinkError::ValueOutOfRange(_))
        ));
        assert!(encode(&TypedValue::Integer(-1), &unsigned).is_err());
        let signed = spec(1, ValueFormat::default().with_signed(true));
        assert_eq!(encode(&TypedValue::Integer(-128), &signed).unwrap(), vec![0x80]);
        assert!(encode(&TypedValue::Integer(128), &signed).is_err());
    }

    #[test]
    fn test_min_max_bounds() {
        let format = ValueFormat::scaled(1.0).with_bounds(Some(10.0), Some(30.0));
        let spec = spec(1, format);
        assert!(encode(&TypedValue::Number(20.0), &spec).is_ok());
        assert!(matches!(
            encode(&TypedValue::Number(31.0), &spec),
            Err(OptolinkError::ValueOutOfRange(_))
        ));
        assert!(encode(&TypedValue::Number(9.0), &spec).is_err());
    }

    #[test]
    fn test_boolean() {
        let spec = spec(1, ValueFormat::new(DataType::Boolean));
        assert_eq!(decode(&[0x00], &spec).unwrap(), TypedValue::Boolean(false));
        assert_eq!(decode(&[0x7F], &spec).unwrap(), TypedValue::Boolean(true));
        assert_eq!(encode(&TypedValue::Boolean(true), &spec).unwrap(), vec![0x01]);
        assert_eq!(encode(&TypedValue::Boolean(false), &spec).unwrap(), vec![0x00]);
    }

    #[test]
    fn test_string() {
        let spec = spec(8, ValueFormat::new(DataType::String));
        let decoded = decode(b"V200KW2 ", &spec).unwrap();
        assert_eq!(decoded, TypedValue::Text("V200KW2".to_string()));
        assert_eq!(decode(&[b'A', 0, 0, 0, 0, 0, 0, 0], &spec).unwrap().as_str(), Some("A"));
        assert_eq!(
            encode(&TypedValue::from("ABC"), &spec).unwrap(),
            vec![b'A', b'B', b'C', 0, 0, 0, 0, 0]
        );
        assert!(matches!(
            encode(&TypedValue::from("ABCDEFGHI"), &spec),
            Err(OptolinkError::ValueTooLong(_))
        ));
    }

    #[test]
    fn test_timer_schedule_scenario() {
        let spec = spec(8, ValueFormat::new(DataType::TimerSchedule));
        let bytes = [0x24, 0x60, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let TypedValue::Schedule(schedule) = decode(&bytes, &spec).unwrap() else {
            panic!("expected a schedule");
        };
        let pairs: Vec<SwitchingPair> = schedule.pairs().collect();
        assert_eq!(pairs, vec![SwitchingPair::parse("06:00", "16:00").unwrap()]);
        assert_eq!(schedule.slots().iter().filter(|slot| slot.is_none()).count(), 3);
        assert_eq!(encode(&TypedValue::Schedule(schedule), &spec).unwrap(), bytes.to_vec());
    }

    #[test]
    fn test_timer_schedule_invalid() {
        let spec = spec(8, ValueFormat::new(DataType::TimerSchedule));
        let on = crate::datatypes::TimeOfDay::parse("20:00").unwrap();
        let off = crate::datatypes::TimeOfDay::parse("08:00").unwrap();
        let schedule = TimerSchedule::from_slots([Some(SwitchingPair { on, off }), None, None, None]);
        assert!(matches!(
            encode(&TypedValue::Schedule(schedule), &spec),
            Err(OptolinkError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn test_timer_schedule_packed() {
        let format = ValueFormat::new(DataType::TimerSchedule).with_timer_encoding(TimerEncoding::Packed);
        let spec = spec(8, format);
        let schedule = TimerSchedule::new(vec![SwitchingPair::parse("05:30", "22:00").unwrap()]).unwrap();
        let bytes = encode(&TypedValue::Schedule(schedule), &spec).unwrap();
        assert_eq!(bytes, vec![43, 176, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(decode(&bytes, &spec).unwrap(), TypedValue::Schedule(schedule));
    }

    #[test]
    fn test_enumeration() {
        let format = ValueFormat::new(DataType::Enumeration)
            .with_label(0, "Abschaltbetrieb")
            .with_label(1, "Nur WW")
            .with_label(2, "Heizen und WW");
        let spec = spec(1, format);
        assert_eq!(decode(&[0x01], &spec).unwrap(), TypedValue::from("Nur WW"));
        assert_eq!(decode(&[0x07], &spec).unwrap(), TypedValue::Integer(7));
        assert_eq!(encode(&TypedValue::from("heizen und ww"), &spec).unwrap(), vec![0x02]);
        assert_eq!(encode(&TypedValue::Integer(1), &spec).unwrap(), vec![0x01]);
        assert!(encode(&TypedValue::from("Party"), &spec).is_err());
    }

    #[test]
    fn test_datetime() {
        let spec = spec(8, ValueFormat::new(DataType::DateTime));
        let bytes = [0x20, 0x24, 0x03, 0x15, 0x05, 0x12, 0x34, 0x56];
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(12, 34, 56)
            .unwrap();
        assert_eq!(decode(&bytes, &spec).unwrap(), TypedValue::DateTime(expected));
        assert_eq!(encode(&TypedValue::DateTime(expected), &spec).unwrap(), bytes.to_vec());
        assert!(decode(&[0x20, 0x24, 0x13, 0x15, 0x05, 0x12, 0x34, 0x56], &spec).is_err());
        assert!(decode(&[0x20, 0x2A, 0x03, 0x15, 0x05, 0x12, 0x34, 0x56], &spec).is_err());
    }

    #[test]
    fn test_raw() {
        let spec = spec(2, ValueFormat::new(DataType::Raw));
        assert_eq!(decode(&[0x20, 0x9B], &spec).unwrap(), TypedValue::Raw(vec![0x20, 0x9B]));
        assert!(encode(&TypedValue::Raw(vec![1, 2, 3]), &spec).is_err());
    }

    #[test]
    fn test_wrong_length_and_type() {
        let spec = spec(2, ValueFormat::default());
        assert!(matches!(decode(&[0x01], &spec), Err(OptolinkError::InvalidData(_))));
        assert!(matches!(
            encode(&TypedValue::from("text"), &spec),
            Err(OptolinkError::InvalidData(_))
        ));
    }

    #[test]
    fn test_wide_integers_are_exact() {
        let signed = spec(8, ValueFormat::default().with_signed(true));
        for value in [9_007_199_254_740_993, i64::MAX, i64::MIN, -1] {
            let bytes = encode(&TypedValue::Integer(value), &signed).unwrap();
            assert_eq!(decode(&bytes, &signed).unwrap(), TypedValue::Integer(value));
        }
        assert_eq!(
            encode(&TypedValue::Integer(9_007_199_254_740_993), &signed).unwrap(),
            vec![0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]
        );
        assert!(encode(&TypedValue::Number(1.5), &signed).is_err());
        assert_eq!(encode(&TypedValue::Number(-2.0), &signed).unwrap()[7], 0xFE);
    }

    #[test]
    fn test_unsigned_eight_bytes_above_i64() {
        let unsigned = spec(8, ValueFormat::default());
        let bytes = encode(&TypedValue::Integer(i64::MAX), &unsigned).unwrap();
        assert_eq!(decode(&bytes, &unsigned).unwrap(), TypedValue::Integer(i64::MAX));
        assert!(matches!(
            decode(&[0x80, 0, 0, 0, 0, 0, 0, 0], &unsigned),
            Err(OptolinkError::InvalidData(_))
        ));
        let huge = spec(8, ValueFormat::scaled(1.0));
        assert!(matches!(
            encode(&TypedValue::Number(1.0e19), &huge),
            Err(OptolinkError::ValueOutOfRange(_))
        ));
    }

    #[test]
    fn test_date_only() {
        let spec = spec(8, ValueFormat::new(DataType::Date));
        let bytes = [0x20, 0x24, 0x03, 0x15, 0x05, 0x12, 0x34, 0x56];
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(decode(&bytes, &spec).unwrap(), TypedValue::Date(date));
        assert_eq!(
            encode(&TypedValue::Date(date), &spec).unwrap(),
            vec![0x20, 0x24, 0x03, 0x15, 0x05, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_serial_number() {
        let spec = spec(7, ValueFormat::new(DataType::SerialNumber));
        assert_eq!(decode(b"7571234", &spec).unwrap(), TypedValue::from("0X738722"));
        assert!(matches!(
            decode(b"75712A4", &spec),
            Err(OptolinkError::InvalidData(_))
        ));
        assert!(encode(&TypedValue::from("0X738722"), &spec).is_err());
    }

    #[test]
    fn test_round_trip_in_range_values() {
        let cases = vec![
            (spec(1, ValueFormat::default()), TypedValue::Integer(200)),
            (spec(4, ValueFormat::default().with_signed(true)), TypedValue::Integer(-70000)),
            (spec(2, ValueFormat::scaled(100.0).with_signed(true)), TypedValue::Number(-12.34)),
            (spec(1, ValueFormat::new(DataType::Boolean)), TypedValue::Boolean(true)),
            (spec(4, ValueFormat::new(DataType::String)), TypedValue::from("WW")),
        ];
        for (spec, value) in cases {
            let bytes = encode(&value, &spec).unwrap();
            assert_eq!(decode(&bytes, &spec).unwrap(), value);
        }
    }
}
