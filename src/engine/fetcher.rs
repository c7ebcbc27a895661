use crate::definition::{RemoteArchive, Verification};
use crate::utils::path_exists;
use async_trait::async_trait;
use reqwest::Client;
use ring::digest::{Context, SHA256};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

/// Brings an archive to a local path. Existing files are reused.
#[async_trait]
pub trait Fetch: Send + Sync + Debug {
    async fn fetch(&self, archive: &RemoteArchive, path: &Path) -> Result<(), FetchError>;
}

#[derive(Debug)]
pub struct FetchError {
    kind: FetchErrorKind,
    affected: Option<FetchAffected>,
    url: String,
    inner: Option<Box<dyn Error + Sync + Send>>,
}

impl FetchError {
    pub fn transfer(url: &str, inner: impl Into<Box<dyn Error + Sync + Send>>) -> Self {
        FetchError {
            kind: FetchErrorKind::Transfer,
            affected: None,
            url: url.to_string(),
            inner: Some(inner.into()),
        }
    }

    fn io(url: &str, path: &Path, inner: std::io::Error) -> Self {
        FetchError {
            kind: FetchErrorKind::Io,
            affected: Some(FetchAffected::Local(path.to_path_buf())),
            url: url.to_string(),
            inner: Some(Box::new(inner)),
        }
    }

    pub fn is_verification_failure(&self) -> bool {
        matches!(self.kind, FetchErrorKind::VerificationFailed { .. })
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner
            .as_ref()
            .map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            FetchErrorKind::VerificationFailed { hashes } => {
                write!(f, "verification failed (")?;
                let mut first = true;
                for FailedHash {
                    algo,
                    found,
                    expected,
                } in hashes
                {
                    if !first {
                        write!(f, ", ")?;
                    }

                    first = false;
                    write!(
                        f,
                        "{} expected {} but found {}",
                        algo,
                        hex::encode(expected),
                        hex::encode(found)
                    )?;
                }
                write!(f, ")")?;
            }
            FetchErrorKind::Transfer => {
                write!(f, "download failed")?;
            }
            FetchErrorKind::Io => {
                write!(f, "i/o error")?;
            }
        }

        write!(f, " for {}", self.url)?;

        match &self.affected {
            Some(FetchAffected::Fetched) => {
                write!(f, " with fetched file")?;
            }
            Some(FetchAffected::Local(p)) => {
                write!(f, " with local file ({})", p.display())?;
            }
            None => {}
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct FailedHash {
    algo: &'static str,
    found: Box<[u8]>,
    expected: Box<[u8]>,
}

#[derive(Debug)]
pub enum FetchAffected {
    Fetched,
    Local(PathBuf),
}

#[derive(Debug)]
pub enum FetchErrorKind {
    VerificationFailed { hashes: Vec<FailedHash> },
    Transfer,
    Io,
}

pub struct DigestPool<'a> {
    pool: Vec<(Context, &'a [u8], &'static str)>,
}

impl DigestPool<'_> {
    pub fn from_verification(verification: &Verification) -> DigestPool {
        let mut pool = vec![];

        if let Some(sha) = &verification.sha256 {
            pool.push((Context::new(&SHA256), &sha[..], "sha256"));
        }

        DigestPool { pool }
    }

    pub fn update(&mut self, data: &[u8]) {
        for (ctx, _, _) in &mut self.pool {
            ctx.update(data);
        }
    }

    pub fn finish(self) -> Result<(), Vec<FailedHash>> {
        let mut failed_hash = vec![];

        for (ctx, comp, algo) in self.pool {
            let dig = ctx.finish();
            if dig.as_ref() != comp {
                failed_hash.push(FailedHash {
                    algo,
                    found: Box::from(dig.as_ref()),
                    expected: Box::from(comp),
                });
            }
        }

        if failed_hash.is_empty() {
            Ok(())
        } else {
            Err(failed_hash)
        }
    }
}

/// HTTP(S) fetcher.
#[derive(Debug)]
pub struct Fetcher {
    http_client: Client,
}

impl Default for Fetcher {
    fn default() -> Self {
        Fetcher::new()
    }
}

impl Fetcher {
    pub fn new() -> Self {
        Fetcher {
            http_client: Client::new(),
        }
    }

    async fn download(&self, archive: &RemoteArchive, path: &Path) -> Result<(), FetchError> {
        let url = archive.url.as_str();
        let partial = partial_path(path);

        info!("fetching {} to {}", url, path.display());
        let req = self
            .http_client
            .get(url)
            .build()
            .map_err(|e| FetchError::transfer(url, e))?;
        let mut resp = self
            .http_client
            .execute(req)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FetchError::transfer(url, e))?;

        let mut f = File::create(&partial)
            .await
            .map_err(|e| FetchError::io(url, &partial, e))?;
        let mut pool = DigestPool::from_verification(&archive.verification);

        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| FetchError::transfer(url, e))?
        {
            pool.update(&chunk);
            f.write_all(&chunk)
                .await
                .map_err(|e| FetchError::io(url, &partial, e))?;
        }

        if let Err(hashes) = pool.finish() {
            drop(f);
            tokio::fs::remove_file(&partial)
                .await
                .map_err(|e| FetchError::io(url, &partial, e))?;

            return Err(FetchError {
                kind: FetchErrorKind::VerificationFailed { hashes },
                affected: Some(FetchAffected::Fetched),
                url: url.to_string(),
                inner: None,
            });
        }

        f.sync_all()
            .await
            .map_err(|e| FetchError::io(url, &partial, e))?;
        drop(f);

        tokio::fs::rename(&partial, path)
            .await
            .map_err(|e| FetchError::io(url, path, e))
    }
}

#[async_trait]
impl Fetch for Fetcher {
    async fn fetch(&self, archive: &RemoteArchive, path: &Path) -> Result<(), FetchError> {
        let url = archive.url.as_str();

        if path_exists(path)
            .await
            .map_err(|e| FetchError::io(url, path, e))?
        {
            info!("reusing {}", path.display());
            return check_existing(archive, path).await;
        }

        self.download(archive, path).await
    }
}

/// Verifies an archive that is already on disk against its pinned digests.
pub async fn check_existing(archive: &RemoteArchive, path: &Path) -> Result<(), FetchError> {
    let url = archive.url.as_str();
    match verify_file(path, &archive.verification)
        .await
        .map_err(|e| FetchError::io(url, path, e))?
    {
        Ok(()) => Ok(()),
        Err(hashes) => Err(FetchError {
            kind: FetchErrorKind::VerificationFailed { hashes },
            affected: Some(FetchAffected::Local(path.to_path_buf())),
            url: url.to_string(),
            inner: None,
        }),
    }
}

pub async fn verify_file(
    path: &Path,
    verification: &Verification,
) -> std::io::Result<Result<(), Vec<FailedHash>>> {
    let mut file = OpenOptions::new()
        .read(true)
        .create(false)
        .write(false)
        .open(path)
        .await?;

    let mut pool = DigestPool::from_verification(verification);
    let mut buffer = vec![0; 4096];

    loop {
        let r = file.read(&mut buffer).await?;
        if r == 0 {
            break;
        }

        pool.update(&buffer[..r]);
    }

    Ok(pool.finish())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}
