//! pcapng writer for frames captured by frame detectors.
//!
//! Every frame detector gets two interfaces, one per direction, so that a capture
//! opened in a packet analyzer shows which port a frame entered from.
use std::{collections::HashMap, io::Write};

use crate::{
    device::{DeviceKind, DeviceSet},
    measurement::{Direction, FrameMatch},
};

const SECTION_HEADER_BLOCK: u32 = 0x0A0D0D0A;
const INTERFACE_DESCRIPTION_BLOCK: u32 = 0x0000_0001;
const ENHANCED_PACKET_BLOCK: u32 = 0x0000_0006;
const BYTE_ORDER_MAGIC: u32 = 0x1A2B3C4D;

const LINKTYPE_ETHERNET: u16 = 1;
const OPT_IF_NAME: u16 = 2;
const OPT_IF_TSRESOL: u16 = 9;
const OPT_EPB_PACKETID: u16 = 5;
/// Custom option carrying the match mask and frame flags.
const OPT_CUSTOM: u16 = 2989;

/// Clock period used until a timer reports its frequency, 125 MHz.
const DEFAULT_CLOCK_PERIOD_NS: u64 = 8;

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

fn push_option(out: &mut Vec<u8>, code: u16, value: &[u8]) {
    out.extend_from_slice(&code.to_le_bytes());
    out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    out.extend_from_slice(value);
    out.resize(out.len() + padding(value.len()), 0);
}

pub struct CaptureWriter<W: Write> {
    output: W,
    clock_period: u64,
    /// First interface id of each frame detector, the second direction follows it.
    interfaces: HashMap<u8, u32>,
    interface_count: u32,
}

impl<W: Write> CaptureWriter<W> {
    /// Starts a capture, writing the section header to `output`.
    pub fn new(output: W) -> std::io::Result<CaptureWriter<W>> {
        let mut writer = CaptureWriter {
            output,
            clock_period: DEFAULT_CLOCK_PERIOD_NS,
            interfaces: HashMap::new(),
            interface_count: 0,
        };

        let mut header = Vec::with_capacity(16);
        header.extend_from_slice(&BYTE_ORDER_MAGIC.to_le_bytes());
        header.extend_from_slice(&1u16.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        // Section length is not specified.
        header.extend_from_slice(&[0xFF; 8]);
        writer.write_block(SECTION_HEADER_BLOCK, &header)?;

        Ok(writer)
    }

    /// Takes the clock period from the timer and adds the interfaces of every frame detector.
    pub fn register_devices(&mut self, devices: &DeviceSet) -> std::io::Result<()> {
        for device in devices.iter() {
            match device.kind() {
                DeviceKind::SimpleTimer(timer) if timer.freq != 0 => {
                    self.clock_period = 1_000_000_000 / timer.freq as u64;
                }
                DeviceKind::FrameDetector(info) => {
                    let &[a, b] = device.ports() else {
                        log::warn!("frame detector {} does not have two ports, skipping", device.id());
                        continue;
                    };
                    self.interfaces.insert(device.id(), self.interface_count);
                    self.add_interface(&format!("eth{a}_to_eth{b}"), info.extr_fifo_size)?;
                    self.add_interface(&format!("eth{b}_to_eth{a}"), info.extr_fifo_size)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Writes a captured frame. Returns `false` if `device_id` was never registered.
    pub fn write_frame(&mut self, device_id: u8, frame: &FrameMatch) -> std::io::Result<bool> {
        let Some(&first) = self.interfaces.get(&device_id) else {
            return Ok(false);
        };
        let interface = match frame.direction() {
            Direction::AToB => first,
            Direction::BToA => first + 1,
        };

        let time = self.clock_period.wrapping_mul(frame.time);
        let len = frame.payload.len() as u32;
        let flags = ((frame.match_mask as u32) << 8) | (frame.flags as u32 >> 1);

        let mut packet = Vec::with_capacity(48 + frame.payload.len());
        packet.extend_from_slice(&interface.to_le_bytes());
        packet.extend_from_slice(&((time >> 32) as u32).to_le_bytes());
        packet.extend_from_slice(&(time as u32).to_le_bytes());
        packet.extend_from_slice(&len.to_le_bytes());
        packet.extend_from_slice(&len.to_le_bytes());
        packet.extend_from_slice(&frame.payload);
        packet.resize(packet.len() + padding(frame.payload.len()), 0);
        push_option(&mut packet, OPT_EPB_PACKETID, &frame.number.to_le_bytes());
        push_option(&mut packet, OPT_CUSTOM, &flags.to_le_bytes());

        self.write_block(ENHANCED_PACKET_BLOCK, &packet)?;
        Ok(true)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.output.flush()
    }

    pub fn into_inner(self) -> W {
        self.output
    }

    fn add_interface(&mut self, name: &str, snap_len: u32) -> std::io::Result<()> {
        let mut description = Vec::with_capacity(32);
        description.extend_from_slice(&LINKTYPE_ETHERNET.to_le_bytes());
        description.extend_from_slice(&0u16.to_le_bytes());
        description.extend_from_slice(&snap_len.to_le_bytes());
        push_option(&mut description, OPT_IF_NAME, name.as_bytes());
        // Nanosecond timestamps
        push_option(&mut description, OPT_IF_TSRESOL, &[9]);

        self.write_block(INTERFACE_DESCRIPTION_BLOCK, &description)?;
        self.interface_count += 1;
        Ok(())
    }

    fn write_block(&mut self, block_type: u32, payload: &[u8]) -> std::io::Result<()> {
        let pad = padding(payload.len());
        let length = (12 + payload.len() + pad) as u32;

        self.output.write_all(&block_type.to_le_bytes())?;
        self.output.write_all(&length.to_le_bytes())?;
        self.output.write_all(payload)?;
        self.output.write_all(&[0u8; 3][..pad])?;
        self.output.write_all(&length.to_le_bytes())
    }
}
