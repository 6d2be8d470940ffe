//! WiFi station plus plain HTTP GET over embassy-net

use embassy_net::{Stack, dns::DnsQueryType, tcp::TcpSocket};
use embassy_time::{Duration, Timer, with_timeout};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController};
use log::{debug, info, warn};
use spectra_frame_core::http::{self, DeviceHeaders, HttpError, Url};
use spectra_frame_core::wake::{ContentSource, Fetched};

/// Association attempts before giving up for this wake
const CONNECT_ATTEMPTS: u32 = 3;
/// Bound on association plus DHCP
const LINK_TIMEOUT: Duration = Duration::from_secs(20);
/// Socket inactivity timeout
const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum NetError {
    /// Radio refused the configuration or would not start
    Radio,
    /// No association after all attempts
    Association,
    /// No link or address within `LINK_TIMEOUT`
    NoAddress,
    Dns,
    Http(HttpError),
}

impl From<HttpError> for NetError {
    fn from(e: HttpError) -> Self {
        NetError::Http(e)
    }
}

pub struct WifiNet {
    controller: WifiController<'static>,
    stack: Stack<'static>,
    ssid: &'static str,
    password: &'static str,
    connected: bool,
}

impl WifiNet {
    pub fn new(
        controller: WifiController<'static>,
        stack: Stack<'static>,
        ssid: &'static str,
        password: &'static str,
    ) -> Self {
        Self {
            controller,
            stack,
            ssid,
            password,
            connected: false,
        }
    }

    pub fn stack(&self) -> Stack<'static> {
        self.stack
    }

    async fn associate(&mut self) -> Result<(), NetError> {
        if !matches!(self.controller.is_started(), Ok(true)) {
            let client_config = ModeConfig::Client(
                ClientConfig::default()
                    .with_ssid(self.ssid.into())
                    .with_password(self.password.into()),
            );
            self.controller
                .set_config(&client_config)
                .map_err(|_| NetError::Radio)?;
            self.controller
                .start_async()
                .await
                .map_err(|_| NetError::Radio)?;
            debug!("WiFi started");
        }

        info!("Connecting to {}...", self.ssid);
        for attempt in 1..=CONNECT_ATTEMPTS {
            match self.controller.connect_async().await {
                Ok(()) => {
                    info!("WiFi connected");
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to connect ({}/{}): {:?}", attempt, CONNECT_ATTEMPTS, e);
                    Timer::after(Duration::from_secs(2)).await;
                }
            }
        }
        Err(NetError::Association)
    }

    /// Wait for network stack to get an IP address
    async fn wait_for_ip(&self) {
        while !self.stack.is_link_up() {
            Timer::after(Duration::from_millis(500)).await;
        }
        loop {
            if let Some(config) = self.stack.config_v4() {
                info!("Got IP: {}", config.address);
                return;
            }
            Timer::after(Duration::from_millis(500)).await;
        }
    }

    async fn resolve_host(&self, host: &str) -> Result<core::net::Ipv4Addr, NetError> {
        if let Some(ip) = http::parse_ipv4(host) {
            return Ok(ip);
        }

        debug!("Resolving hostname: {}", host);
        let addrs = self
            .stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(|_| NetError::Dns)?;

        match addrs.first() {
            Some(embassy_net::IpAddress::Ipv4(v4)) => Ok(core::net::Ipv4Addr::from(v4.octets())),
            _ => Err(NetError::Dns),
        }
    }
}

impl ContentSource for WifiNet {
    type Error = NetError;

    async fn connect(&mut self) -> Result<(), NetError> {
        if self.connected {
            return Ok(());
        }
        match with_timeout(LINK_TIMEOUT, self.associate()).await {
            Ok(result) => result?,
            Err(_) => return Err(NetError::Association),
        }
        with_timeout(LINK_TIMEOUT, self.wait_for_ip())
            .await
            .map_err(|_| NetError::NoAddress)?;
        self.connected = true;
        Ok(())
    }

    async fn release(&mut self) {
        if !matches!(self.controller.is_started(), Ok(true)) {
            return;
        }
        if let Err(e) = self.controller.disconnect_async().await {
            debug!("Disconnect error (may already be disconnected): {:?}", e);
        }
        if let Err(e) = self.controller.stop_async().await {
            warn!("WiFi stop error: {:?}", e);
        }
        self.connected = false;
        info!("WiFi stopped");
    }

    async fn get(
        &mut self,
        url: &Url<'_>,
        headers: &DeviceHeaders,
        dst: &mut [u8],
    ) -> Result<Fetched, NetError> {
        let ip = self.resolve_host(url.host).await?;

        let mut rx_buf = [0u8; 4096];
        let mut tx_buf = [0u8; 1024];
        let mut socket = TcpSocket::new(self.stack, &mut rx_buf, &mut tx_buf);
        socket.set_timeout(Some(SOCKET_TIMEOUT));
        socket
            .connect((ip, url.port))
            .await
            .map_err(|_| HttpError::Connect)?;

        let mut len = 0;
        let mut total = 0;
        let mut http_rx_buf = [0u8; 2048];
        let result = http::get(&mut socket, url, headers, &mut http_rx_buf, |chunk| {
            let room = dst.len() - len;
            let n = chunk.len().min(room);
            dst[len..len + n].copy_from_slice(&chunk[..n]);
            len += n;
            total += chunk.len();
        })
        .await;
        socket.close();

        let response = result?;
        debug!("GET {} -> {} ({} bytes)", url.path, response.status, total);
        Ok(Fetched {
            len,
            total,
            image_hash: response.image_hash,
        })
    }
}
