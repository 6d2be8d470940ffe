//! Battery voltage through the on-board divider

use esp_hal::{
    Blocking,
    analog::adc::{Adc, AdcCalCurve, AdcChannel, AdcConfig, AdcPin, Attenuation},
    peripherals::ADC1,
};
use log::debug;
use spectra_frame_core::wake::Battery;

/// Samples averaged per reading
const SAMPLES: u32 = 8;
/// Conversion polls before a sample is given up
const MAX_POLLS: u32 = 1000;
/// Correction for the 1:2 divider resistor tolerance
const CORRECTION_FACTOR: f32 = 1.0;

pub struct BatteryMonitor<'d, PIN> {
    adc: Adc<'d, ADC1<'d>, Blocking>,
    adc_pin: AdcPin<PIN, ADC1<'d>, AdcCalCurve<ADC1<'d>>>,
}

impl<'d, PIN> BatteryMonitor<'d, PIN>
where
    PIN: AdcChannel,
{
    pub fn new(pin: PIN, adc: ADC1<'d>) -> Self {
        let mut config = AdcConfig::new();
        let adc_pin = config.enable_pin_with_cal::<_, AdcCalCurve<ADC1<'d>>>(pin, Attenuation::_11dB);
        Self {
            adc: Adc::new(adc, config),
            adc_pin,
        }
    }

    /// One calibrated sample in millivolts at the pin
    fn sample(&mut self) -> Option<u16> {
        for _ in 0..MAX_POLLS {
            if let Ok(mv) = self.adc.read_oneshot(&mut self.adc_pin) {
                return Some(mv);
            }
        }
        None
    }
}

impl<PIN> Battery for BatteryMonitor<'_, PIN>
where
    PIN: AdcChannel,
{
    fn read_millivolts(&mut self) -> Option<u16> {
        let mut sum = 0u32;
        for _ in 0..SAMPLES {
            sum += u32::from(self.sample()?);
        }
        let pin_mv = sum / SAMPLES;
        debug!("Battery pin: {} mV", pin_mv);

        let battery_mv = (pin_mv * 2) as f32 * CORRECTION_FACTOR;
        match battery_mv as u32 {
            // Nothing on the divider
            0 => None,
            mv => Some(mv.min(u32::from(u16::MAX)) as u16),
        }
    }
}
