use embedded_hal::digital::OutputPin;

use crate::attributes::{attr, cluster};
use crate::network::{CommandError, RemoteCommand, RemoteCommandHandler};

/// Drives the indicator output from writes to the on/off attribute
pub struct IndicatorHandler<P: OutputPin> {
    pin: P,
    endpoint: u8,
    on: bool,
}

impl<P: OutputPin> IndicatorHandler<P> {
    pub fn new(pin: P, endpoint: u8) -> Self {
        Self {
            pin,
            endpoint,
            on: false,
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn set(&mut self, on: bool) -> Result<(), CommandError> {
        let res = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        res.map_err(|e| {
            log::error!("Indicator pin error {e:?}");
            CommandError::Pin
        })?;
        self.on = on;
        log::info!("Indicator {}", if on { "ON" } else { "OFF" });
        Ok(())
    }
}

impl<P: OutputPin> RemoteCommandHandler for IndicatorHandler<P> {
    fn handle(&mut self, command: &RemoteCommand) -> Result<(), CommandError> {
        if command.endpoint != self.endpoint
            || command.cluster != cluster::ON_OFF
            || command.attribute != attr::ON_OFF
        {
            return Err(CommandError::Unsupported {
                cluster: command.cluster,
                attr: command.attribute,
            });
        }
        let on = command.as_bool().ok_or(CommandError::Malformed)?;
        self.set(on)
    }

    fn indicator(&self) -> Option<bool> {
        Some(self.on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;

    #[derive(Default)]
    struct Pin {
        high: bool,
        toggles: u32,
    }

    impl ErrorType for Pin {
        type Error = Infallible;
    }

    impl OutputPin for Pin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.high = false;
            self.toggles += 1;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.high = true;
            self.toggles += 1;
            Ok(())
        }
    }

    #[test]
    fn on_off_drives_pin() {
        let mut handler = IndicatorHandler::new(Pin::default(), 1);
        handler.handle(&RemoteCommand::on_off(1, true)).unwrap();
        assert!(handler.pin.high);
        assert_eq!(handler.indicator(), Some(true));
        handler.handle(&RemoteCommand::on_off(1, false)).unwrap();
        assert!(!handler.pin.high);
        assert!(!handler.is_on());
    }

    #[test]
    fn other_writes_are_rejected() {
        let mut handler = IndicatorHandler::new(Pin::default(), 1);
        let mut cmd = RemoteCommand::on_off(1, true);
        cmd.cluster = cluster::BASIC;
        assert!(matches!(
            handler.handle(&cmd),
            Err(CommandError::Unsupported { .. })
        ));
        assert_eq!(
            handler.handle(&RemoteCommand::on_off(2, true)),
            Err(CommandError::Unsupported {
                cluster: cluster::ON_OFF,
                attr: attr::ON_OFF
            })
        );

        let mut cmd = RemoteCommand::on_off(1, true);
        cmd.data.clear();
        assert_eq!(handler.handle(&cmd), Err(CommandError::Malformed));
        assert_eq!(handler.pin.toggles, 0);
    }
}
