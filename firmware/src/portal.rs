//! Configuration mode server on port 80

use embassy_net::{Stack, tcp::TcpSocket};
use embassy_time::{Duration, Timer};
use embedded_io_async::Write;
use log::{info, warn};
use spectra_frame_core::config::ConfigStore;
use spectra_frame_core::portal::{self, PortalAction};
use spectra_frame_core::storage::Storage;

const PORT: u16 = 80;
/// Largest request accepted, head plus form body
const REQUEST_MAX: usize = 2048;

/// Serve configuration requests until a client asks for a reboot
pub async fn serve<S: Storage>(stack: Stack<'static>, store: &mut ConfigStore<S>, device_id: &str) {
    if let Some(config) = stack.config_v4() {
        info!("Configuration portal at http://{}/status", config.address.address());
    }

    let mut rx_buf = [0u8; 2048];
    let mut tx_buf = [0u8; 2048];
    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buf, &mut tx_buf);
        socket.set_timeout(Some(Duration::from_secs(10)));

        if let Err(e) = socket.accept(PORT).await {
            warn!("Accept failed: {:?}", e);
            continue;
        }

        let mut request = [0u8; REQUEST_MAX];
        let mut len = 0;
        while len < request.len() && !portal::request_complete(&request[..len]) {
            match socket.read(&mut request[len..]).await {
                Ok(0) => break,
                Ok(n) => len += n,
                Err(e) => {
                    warn!("Read failed: {:?}", e);
                    break;
                }
            }
        }

        let response = portal::handle(&request[..len], store, device_id);
        let sent = async {
            socket.write_all(response.head().as_bytes()).await?;
            socket.write_all(response.body.as_bytes()).await?;
            socket.flush().await
        }
        .await;
        if let Err(e) = sent {
            warn!("Write failed: {:?}", e);
        }
        socket.close();

        if response.action == PortalAction::Reboot {
            // Let the FIN go out before dropping the socket
            Timer::after(Duration::from_millis(200)).await;
            return;
        }
    }
}
