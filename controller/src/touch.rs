use anyhow::anyhow;
use esp_idf_svc::sys;
use log::{debug, info};

/// Capacitive touch pad on the legacy ESP32 touch driver. Lower readings mean contact.
pub struct TouchPad {
    pad: sys::touch_pad_t,
    failed_reads: u32,
}

impl TouchPad {
    pub fn new(pad: u8) -> anyhow::Result<Self> {
        let pad = sys::touch_pad_t::from(pad);

        let rc = unsafe { sys::touch_pad_init() };
        if rc != sys::ESP_OK {
            return Err(anyhow!("touch_pad_init failed with code {rc}"));
        }

        let rc = unsafe { sys::touch_pad_config(pad, 0) };
        if rc != sys::ESP_OK {
            return Err(anyhow!("touch_pad_config(T{pad}) failed with code {rc}"));
        }

        info!("touch pad T{pad} initialized");
        Ok(Self {
            pad,
            failed_reads: 0,
        })
    }

    pub fn read(&mut self) -> Option<u16> {
        let mut value: u16 = 0;
        let rc = unsafe { sys::touch_pad_read(self.pad, &mut value) };
        if rc == sys::ESP_OK {
            self.failed_reads = 0;
            return Some(value);
        }

        self.failed_reads = self.failed_reads.saturating_add(1);
        if self.failed_reads == 1 || self.failed_reads % 100 == 0 {
            debug!(
                "touch_pad_read(T{}) failed with code {rc} ({} consecutive)",
                self.pad, self.failed_reads
            );
        }
        None
    }
}
