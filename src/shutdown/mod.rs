use std::io;
use std::thread::{self, JoinHandle};

#[cfg(unix)]
use signal_hook::consts::signal::{SIGINT, SIGTERM};
#[cfg(unix)]
use signal_hook::iterator::{Handle, Signals};

use crate::server::ReactorHandle;

pub struct ShutdownHooks {
    #[cfg(unix)]
    signals: Handle,
    listener: Option<JoinHandle<Option<i32>>>,
}

impl ShutdownHooks {
    pub fn install(reactor: ReactorHandle) -> io::Result<Self> {
        #[cfg(unix)]
        {
            let mut signals = Signals::new([SIGINT, SIGTERM])?;
            let handle = signals.handle();
            let listener = thread::Builder::new()
                .name("msgmux-signals".to_owned())
                .spawn(move || {
                    let received = signals.forever().next();
                    if received.is_some() {
                        let _ = reactor.shutdown();
                    }
                    received
                })?;
            Ok(Self {
                signals: handle,
                listener: Some(listener),
            })
        }

        #[cfg(not(unix))]
        {
            let _ = reactor;
            Ok(Self { listener: None })
        }
    }

    pub fn uninstall(mut self) -> Option<i32> {
        self.stop_listener()
    }

    fn stop_listener(&mut self) -> Option<i32> {
        #[cfg(unix)]
        self.signals.close();
        self.listener
            .take()
            .and_then(|listener| listener.join().ok().flatten())
    }
}

impl Drop for ShutdownHooks {
    fn drop(&mut self) {
        self.stop_listener();
    }
}
