//! GATT service definition for the link
//!
//! One primary service with two characteristics in the Nordic UART layout:
//! the central writes to the RX characteristic and the peripheral notifies
//! on the TX characteristic.

use uuid::Uuid;

use super::transport::{
    CharacteristicProperties, GattCharacteristicDef, GattService, GattServiceDef,
};
use crate::error::DriverError;
use crate::transport::CharacteristicHandle;

/// Primary service UUID.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);

/// Characteristic the central writes to.
pub const WRITE_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);

/// Characteristic the peripheral notifies on.
pub const NOTIFY_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

const AD_TYPE_FLAGS: u8 = 0x01;
const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
/// LE General Discoverable, BR/EDR not supported.
const AD_FLAGS_GENERAL_DISCOVERABLE: u8 = 0x06;

/// Identifiers of the service the two devices exchange data over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkService {
    pub advertised_name: String,
    pub service_uuid: Uuid,
    pub write_uuid: Uuid,
    pub notify_uuid: Uuid,
}

impl Default for LinkService {
    fn default() -> Self {
        Self {
            advertised_name: "ESP32_BLE_Server".to_string(),
            service_uuid: SERVICE_UUID,
            write_uuid: WRITE_CHARACTERISTIC_UUID,
            notify_uuid: NOTIFY_CHARACTERISTIC_UUID,
        }
    }
}

impl LinkService {
    /// The GATT table the peripheral registers.
    pub fn definition(&self) -> GattServiceDef {
        GattServiceDef {
            uuid: self.service_uuid,
            characteristics: vec![
                GattCharacteristicDef {
                    uuid: self.write_uuid,
                    properties: CharacteristicProperties { write: true, notify: false },
                },
                GattCharacteristicDef {
                    uuid: self.notify_uuid,
                    properties: CharacteristicProperties { write: false, notify: true },
                },
            ],
        }
    }

    /// Find the link service in a discovered or registered GATT table and
    /// return its value handles.
    pub fn resolve(&self, services: &[GattService]) -> Result<CharacteristicHandle, DriverError> {
        let service = services
            .iter()
            .find(|s| s.uuid == self.service_uuid)
            .ok_or_else(|| DriverError::Gatt(format!("service {} not found", self.service_uuid)))?;

        let write = service
            .characteristics
            .iter()
            .find(|c| c.uuid == self.write_uuid && c.properties.write)
            .ok_or_else(|| {
                DriverError::Gatt(format!("writable characteristic {} not found", self.write_uuid))
            })?;
        let notify = service
            .characteristics
            .iter()
            .find(|c| c.uuid == self.notify_uuid && c.properties.notify)
            .ok_or_else(|| {
                DriverError::Gatt(format!("notify characteristic {} not found", self.notify_uuid))
            })?;

        Ok(CharacteristicHandle {
            write: write.value_handle,
            notify: notify.value_handle,
        })
    }

    /// Advertisement payload: flags plus the complete local name.
    pub fn advertisement(&self) -> Vec<u8> {
        let name = self.advertised_name.as_bytes();
        // An AD structure is at most 31 bytes in total; 3 go to the flags and
        // 2 to the name header.
        let name = &name[..name.len().min(26)];
        let mut data = vec![0x02, AD_TYPE_FLAGS, AD_FLAGS_GENERAL_DISCOVERABLE];
        data.push(name.len() as u8 + 1);
        data.push(AD_TYPE_COMPLETE_LOCAL_NAME);
        data.extend_from_slice(name);
        data
    }
}

/// Extract the complete local name from advertisement data, if present.
pub fn advertised_name(data: &[u8]) -> Option<String> {
    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let len = len as usize;
        if len == 0 || tail.len() < len {
            return None;
        }
        let (field, next) = tail.split_at(len);
        if field[0] == AD_TYPE_COMPLETE_LOCAL_NAME {
            return Some(String::from_utf8_lossy(&field[1..]).into_owned());
        }
        rest = next;
    }
    None
}
