use crate::cancel::CancellationToken;
use anyhow::{Context, Result};
use quick_xml::{escape::escape, events::Event, Reader};
use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
    time::Duration,
};
use time::{macros::format_description, OffsetDateTime};
use tracing::{debug, error};

pub const SECURED_URL: &str =
    "https://fe3.delivery.mp.microsoft.com/ClientWebService/client.asmx/secured";
const DOWNLOAD_HOST: &str = "http://tlu.dl.delivery.mp.microsoft.com/";
const WUCLIENT: &str = "http://www.microsoft.com/SoftwareDistribution/Server/ClientWebService";
const WSU: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
const MESSAGE_ID: &str = "urn:uuid:1a88ab88-d8eb-47bb-82d9-f2bd82654c6e";
const DEVICE_ATTRIBUTES: &str = "E:BranchReadinessLevel=CBB&DchuNvidiaGrfxExists=1&ProcessorIdentifier=Intel64%20Family%206%20Model%2063%20Stepping%202&CurrentBranch=rs4_release&DataVer_RS5=1942&FlightRing=Retail&AttrDataVer=57&InstallLanguage=en-US&DchuAmdGrfxExists=1&OSUILocale=en-US&InstallationType=Client&FlightingBranchName=&Version_RS5=10&UpgEx_RS5=Green&GStatus_RS5=2&OSSkuId=48&App=WU&InstallDate=1529700913&ProcessorManufacturer=GenuineIntel&AppVer=10.0.17134.471&OSArchitecture=AMD64&UpdateManagementGroup=2&IsDeviceRetailDemo=0&HidOverGattReg=C%3A%5CWINDOWS%5CSystem32%5CDriverStore%5CFileRepository%5Chidbthle.inf_amd64_467f181075371c89%5CMicrosoft.Bluetooth.Profiles.HidOverGatt.dll&IsFlightingEnabled=0&DchuIntelGrfxExists=1&TelemetryLevel=1&DefaultUserRegion=244&DeferFeatureUpdatePeriodInDays=365&Bios=Unknown&WuClientVer=10.0.17134.471&PausedFeatureStatus=1&Steam=URL%3Asteam%20protocol&Free=8to16&OSVersion=10.0.17134.472&DeviceFamily=Windows.Desktop";
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SoapError(pub String);

/// `processed` bytes so far and the total when the server sent one.
pub type DownloadProgress<'a> = &'a dyn Fn(u64, Option<u64>);

pub trait PackageFetcher: Send + Sync {
    /// Resolves an update identifier to a package URL; `None` when the
    /// service returns no usable location.
    fn resolve_link(&self, guid: &str) -> Result<Option<String>>;
    /// Streams `url` into `destination`, checking `token` between chunks.
    fn download(
        &self,
        url: &str,
        destination: &Path,
        token: &CancellationToken,
        progress: DownloadProgress<'_>,
    ) -> Result<()>;
}

pub struct HttpFetcher {
    agent: ureq::Agent,
    endpoint: String,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout.max(Duration::from_secs(60)))
            .timeout_write(timeout)
            .build();
        Self {
            agent,
            endpoint: SECURED_URL.to_string(),
        }
    }
}

impl PackageFetcher for HttpFetcher {
    fn resolve_link(&self, guid: &str) -> Result<Option<String>> {
        let envelope = link_request_envelope(&self.endpoint, guid, OffsetDateTime::now_utc())?;
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/soap+xml; charset=utf-8")
            .send_string(&envelope);
        let body = match response {
            Ok(response) => response.into_string().context("read link response")?,
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                let message = fault_reason(&body);
                error!("link request failed with {code}: {message}");
                return Err(SoapError(message).into());
            }
            Err(err) => return Err(err).context("request download link"),
        };
        extract_link(&body)
    }

    fn download(
        &self,
        url: &str,
        destination: &Path,
        token: &CancellationToken,
        progress: DownloadProgress<'_>,
    ) -> Result<()> {
        token.check()?;
        let response = self.agent.get(url).call().context("download package")?;
        let total = response
            .header("Content-Length")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|total| *total > 0);
        debug!("downloading {url} ({total:?} bytes)");

        let mut reader = response.into_reader();
        let mut file = File::create(destination)
            .with_context(|| format!("create {}", destination.display()))?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut processed = 0u64;
        loop {
            token.check()?;
            let read = reader.read(&mut buffer).context("read package stream")?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read]).context("write package")?;
            processed += read as u64;
            progress(processed, total);
        }
        file.flush().context("flush package")?;
        Ok(())
    }
}

/// Renders the `GetExtendedUpdateInfo2` request for one update id.
pub fn link_request_envelope(url: &str, guid: &str, now: OffsetDateTime) -> Result<String> {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    let created = now.format(&format).context("format timestamp")?;
    let expires = (now + time::Duration::minutes(5))
        .format(&format)
        .context("format timestamp")?;
    let url = escape(url);
    let guid = escape(guid);
    let attributes = escape(DEVICE_ATTRIBUTES);
    Ok(format!(
        concat!(
            r#"<s:Envelope xmlns:a="http://www.w3.org/2005/08/addressing" xmlns:s="http://www.w3.org/2003/05/soap-envelope">"#,
            r#"<s:Header>"#,
            r#"<a:Action s:mustUnderstand="1">{wuclient}/GetExtendedUpdateInfo2</a:Action>"#,
            r#"<a:MessageID>{message_id}</a:MessageID>"#,
            r#"<a:To s:mustUnderstand="1">{url}</a:To>"#,
            r#"<o:Security s:mustUnderstand="1" xmlns:o="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd">"#,
            r#"<Timestamp xmlns="{wsu}"><Created>{created}</Created><Expires>{expires}</Expires></Timestamp>"#,
            r#"<wuws:WindowsUpdateTicketsToken wsu:id="ClientMSA" xmlns:wsu="{wsu}" xmlns:wuws="http://schemas.microsoft.com/msus/2014/10/WindowsUpdateAuthorization">"#,
            r#"<TicketType Name="AAD" Version="1.0" Policy="MBI_SSL"/>"#,
            r#"</wuws:WindowsUpdateTicketsToken>"#,
            r#"</o:Security>"#,
            r#"</s:Header>"#,
            r#"<s:Body>"#,
            r#"<GetExtendedUpdateInfo2 xmlns="{wuclient}">"#,
            r#"<updateIDs><UpdateIdentity><UpdateID>{guid}</UpdateID><RevisionNumber>1</RevisionNumber></UpdateIdentity></updateIDs>"#,
            r#"<infoTypes><XmlUpdateFragmentType>FileUrl</XmlUpdateFragmentType></infoTypes>"#,
            r#"<deviceAttributes>{attributes}</deviceAttributes>"#,
            r#"</GetExtendedUpdateInfo2>"#,
            r#"</s:Body>"#,
            r#"</s:Envelope>"#,
        ),
        wuclient = WUCLIENT,
        message_id = MESSAGE_ID,
        url = url,
        wsu = WSU,
        created = created,
        expires = expires,
        guid = guid,
        attributes = attributes,
    ))
}

/// First `FileLocation/Url` on the package download host.
pub fn extract_link(body: &str) -> Result<Option<String>> {
    let urls = texts_at(body, &["FileLocation", "Url"])?;
    Ok(urls.into_iter().find(|url| url.starts_with(DOWNLOAD_HOST)))
}

/// `Fault/Reason/Text`, normalized to a sentence.
pub fn fault_reason(body: &str) -> String {
    let reason = texts_at(body, &["Fault", "Reason", "Text"])
        .ok()
        .and_then(|texts| texts.into_iter().next())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| "An unknown error has occurred".to_string());
    if reason.ends_with('.') {
        reason
    } else {
        format!("{reason}.")
    }
}

// Text of every element whose local-name path ends with `suffix`.
fn texts_at(body: &str, suffix: &[&str]) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);
    let mut stack: Vec<String> = Vec::new();
    let mut found = Vec::new();
    loop {
        match reader.read_event().context("parse soap response")? {
            Event::Start(start) => {
                stack.push(String::from_utf8_lossy(start.local_name().as_ref()).into_owned());
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Text(text) if path_ends_with(&stack, suffix) => {
                found.push(text.unescape().context("unescape soap text")?.into_owned());
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(found)
}

fn path_ends_with(stack: &[String], suffix: &[&str]) -> bool {
    stack.len() >= suffix.len()
        && stack[stack.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(name, want)| name == want)
}
