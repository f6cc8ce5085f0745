#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use svg_llm::retry::Clock;
use svg_llm::{
  PromptPlan, ProviderClient, ProviderConfig, ProviderError, ProviderKind,
  WireRequest,
};

pub const SQUARE_SVG: &str
  = "<svg width=\"100\" height=\"100\"><rect width=\"10\" height=\"10\"/></svg>";

pub fn openai_config() -> ProviderConfig
{   ProviderConfig::new(ProviderKind::OpenAI)
      .with_api_key("test-key")
}

// ===== Scripted provider =====

type Responder
  = dyn Fn(&PromptPlan, u32) -> Result<String, ProviderError> + Send + Sync;

/// Provider double answering from a closure of (plan, call number)
pub struct MockClient
{   responder: Box<Responder>
  , delay: Option<Duration>
  , calls: AtomicU32
  , in_flight: AtomicU32
  , peak_in_flight: AtomicU32
  , plans: Mutex<Vec<PromptPlan>>
  , seeds: Mutex<Vec<Option<u64>>>
}

impl MockClient
{   pub fn new<F>(responder: F) -> Self
    where
      F: Fn(&PromptPlan, u32) -> Result<String, ProviderError>
        + Send + Sync + 'static
    {   MockClient
        {   responder: Box::new(responder)
          , delay: None
          , calls: AtomicU32::new(0)
          , in_flight: AtomicU32::new(0)
          , peak_in_flight: AtomicU32::new(0)
          , plans: Mutex::new(Vec::new())
          , seeds: Mutex::new(Vec::new())
        }
    }

    /// Answers in order; the last answer repeats
    pub fn scripted(script: Vec<Result<String, ProviderError>>) -> Self
    {   MockClient::new(move |_, call| {
          let index = (call as usize - 1).min(script.len() - 1);
          script[index].clone()
        })
    }

    pub fn always(text: &str) -> Self
    {   let text = text.to_string();
        MockClient::new(move |_, _| Ok(text.clone()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self
    {   self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32
    {   self.calls.load(Ordering::SeqCst)
    }

    /// Most sends that were running at the same time
    pub fn peak_in_flight(&self) -> u32
    {   self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn plans(&self) -> Vec<PromptPlan>
    {   self.plans.lock().unwrap().clone()
    }

    pub fn seeds(&self) -> Vec<Option<u64>>
    {   self.seeds.lock().unwrap().clone()
    }
}

/// Decrements the in-flight count even when a send is dropped
struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_>
{   fn drop(&mut self)
    {   self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderClient for MockClient
{   fn kind(&self) -> ProviderKind
    {   ProviderKind::OpenAI
    }

    fn build_request(
      &self
    , plan: &PromptPlan
    , config: &ProviderConfig
    ) -> Result<WireRequest, ProviderError>
    {   Ok(WireRequest
        {   url: "http://mock.invalid/".to_string()
          , headers: vec![]
          , body: serde_json::json!({
              "model": config.model,
              "prompt": plan.user_prompt,
            })
        })
    }

    fn parse_response(&self, body: &str)
      -> Result<String, ProviderError>
    {   Ok(body.to_string())
    }

    async fn send(
      &self
    , plan: &PromptPlan
    , config: &ProviderConfig
    ) -> Result<String, ProviderError>
    {   let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);
        self.plans.lock().unwrap().push(plan.clone());
        self.seeds.lock().unwrap().push(config.seed);
        if let Some(delay) = self.delay
        {   tokio::time::sleep(delay).await;
        }
        (self.responder)(plan, call)
    }
}

// ===== Clock =====

/// Records backoff waits and returns at once.
/// With a token set, the first wait cancels it and never finishes.
#[derive(Default)]
pub struct RecordingClock
{   sleeps: Mutex<Vec<Duration>>
  , cancel_on_sleep: Option<CancellationToken>
}

impl RecordingClock
{   pub fn cancelling(token: CancellationToken) -> Self
    {   RecordingClock
        {   sleeps: Mutex::new(Vec::new())
          , cancel_on_sleep: Some(token)
        }
    }

    pub fn sleeps(&self) -> Vec<Duration>
    {   self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for RecordingClock
{   async fn sleep(&self, duration: Duration)
    {   self.sleeps.lock().unwrap().push(duration);
        match &self.cancel_on_sleep
        {   Some(token) => {
              token.cancel();
              std::future::pending::<()>().await;
            }
          , None => tokio::task::yield_now().await
        }
    }
}

// ===== Loopback HTTP responder =====

#[derive(Debug, Clone)]
pub struct Captured
{   pub request_line: String
  , pub headers: Vec<(String, String)>
  , pub body: String
}

impl Captured
{   pub fn header(&self, name: &str) -> Option<&str>
    {   self.headers.iter()
          .find(|(n, _)| n.eq_ignore_ascii_case(name))
          .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> serde_json::Value
    {   serde_json::from_str(&self.body).unwrap()
    }
}

/// Answers every connection with one canned status and body
pub struct MockServer
{   pub base_url: String
  , captured: Arc<Mutex<Vec<Captured>>>
  , _task: tokio::task::JoinHandle<()>
}

impl MockServer
{   pub async fn start(status: u16, body: &str) -> MockServer
    {   let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let body = body.to_string();

        let _task = tokio::spawn(async move {
          while let Ok((mut stream, _)) = listener.accept().await
          {   let Some(request) = read_request(&mut stream).await
              else
              {   continue;
              };
              sink.lock().unwrap().push(request);
              let response = format!(
                "HTTP/1.1 {} Mock\r\n\
                 Content-Type: application/json\r\n\
                 Content-Length: {}\r\n\
                 Connection: close\r\n\r\n{}",
                status, body.len(), body
              );
              let _ = stream.write_all(response.as_bytes()).await;
              let _ = stream.shutdown().await;
          }
        });

        MockServer
        {   base_url
          , captured
          , _task
        }
    }

    pub fn requests(&self) -> Vec<Captured>
    {   self.captured.lock().unwrap().clone()
    }
}

async fn read_request(stream: &mut tokio::net::TcpStream)
  -> Option<Captured>
{   let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop
    {   let n = stream.read(&mut chunk).await.ok()?;
        if n == 0
        {   return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(i) = buf.windows(4).position(|w| w == b"\r\n\r\n")
        {   break i;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?.to_string();
    let headers: Vec<(String, String)> = lines
      .filter_map(|line| line.split_once(':'))
      .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
      .collect();
    let length = headers.iter()
      .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
      .and_then(|(_, v)| v.parse::<usize>().ok())
      .unwrap_or(0);

    let body_start = header_end + 4;
    while buf.len() < body_start + length
    {   let n = stream.read(&mut chunk).await.ok()?;
        if n == 0
        {   break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let end = buf.len().min(body_start + length);
    let body = String::from_utf8_lossy(&buf[body_start..end]).to_string();

    Some(Captured
    {   request_line
      , headers
      , body
    })
}
