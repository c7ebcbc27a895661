use async_compression::tokio::bufread::{BzDecoder, GzipDecoder, XzDecoder};
use std::ffi::OsStr;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufRead, AsyncRead, ReadBuf};
use tracing::info;

#[derive(Debug, Default)]
pub struct Extractor;

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
enum Compression {
    None,
    Gzip,
    Xz,
    Bz,
}

const GUESSES: &[(&str, Compression)] = &[
    (".tar.gz", Compression::Gzip),
    (".tgz", Compression::Gzip),
    (".tar.xz", Compression::Xz),
    (".txz", Compression::Xz),
    (".tar.bz2", Compression::Bz),
    (".tbz2", Compression::Bz),
    (".tar.bz", Compression::Bz),
    (".tar", Compression::None),
];

enum Decompressor<R: AsyncBufRead> {
    PassThrough(R),
    Xz(XzDecoder<R>),
    Gzip(GzipDecoder<R>),
    Bz(BzDecoder<R>),
}

impl<R: AsyncBufRead + Unpin> AsyncRead for Decompressor<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            Decompressor::PassThrough(r) => AsyncRead::poll_read(Pin::new(r), cx, buf),
            Decompressor::Xz(r) => AsyncRead::poll_read(Pin::new(r), cx, buf),
            Decompressor::Gzip(r) => AsyncRead::poll_read(Pin::new(r), cx, buf),
            Decompressor::Bz(r) => AsyncRead::poll_read(Pin::new(r), cx, buf),
        }
    }
}

fn guess_compression(archive: &Path) -> Option<Compression> {
    let name = archive.file_name().and_then(OsStr::to_str)?;
    GUESSES
        .iter()
        .find(|(ext, _)| name.ends_with(ext))
        .map(|(_, comp)| *comp)
}

impl Extractor {
    pub fn new() -> Self {
        Extractor
    }

    /// Unpacks a (possibly compressed) tarball into `dest`.
    pub async fn extract(&self, archive: &Path, dest: &Path) -> anyhow::Result<()> {
        let compr = match guess_compression(archive) {
            None => {
                anyhow::bail!("couldn't guess archive type of {}", archive.display())
            }

            Some(x) => x,
        };

        tokio::fs::create_dir_all(dest).await?;
        info!("extracting {} into {}", archive.display(), dest.display());

        let read = OpenOptions::new()
            .read(true)
            .write(false)
            .create(false)
            .open(archive)
            .await?;

        let read = tokio::io::BufReader::new(read);
        let read = match compr {
            Compression::None => Decompressor::PassThrough(read),
            Compression::Gzip => Decompressor::Gzip(GzipDecoder::new(read)),
            Compression::Xz => Decompressor::Xz(XzDecoder::new(read)),
            Compression::Bz => Decompressor::Bz(BzDecoder::new(read)),
        };

        let mut archive = tokio_tar::Archive::new(read);
        archive.unpack(dest).await?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_compression::tokio::write::GzipEncoder;
    use tokio::io::AsyncWriteExt;

    /// Packs `src` as `<top>/...` into a gzip compressed tarball at `out`.
    pub(crate) async fn pack_tar_gz(src: &Path, top: &str, out: &Path) {
        let file = tokio::fs::File::create(out).await.unwrap();
        let mut builder = tokio_tar::Builder::new(GzipEncoder::new(file));
        builder.append_dir_all(top, src).await.unwrap();
        let mut encoder = builder.into_inner().await.unwrap();
        encoder.shutdown().await.unwrap();
    }

    #[test]
    fn guesses_by_extension() {
        assert_eq!(
            guess_compression(Path::new("busybox-1.37.0.tar.bz2")),
            Some(Compression::Bz)
        );
        assert_eq!(
            guess_compression(Path::new("zig-x86_64-linux-0.16.0-dev.1912+0cbaaa5eb.tar.xz")),
            Some(Compression::Xz)
        );
        assert_eq!(guess_compression(Path::new("a.tgz")), Some(Compression::Gzip));
        assert_eq!(guess_compression(Path::new("a.tar")), Some(Compression::None));
        assert_eq!(guess_compression(Path::new("a.zip")), None);
    }

    #[tokio::test]
    async fn unpacks_gzip_tarball() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        tokio::fs::create_dir_all(src.join("scripts")).await.unwrap();
        tokio::fs::write(src.join("Makefile"), "all:\n").await.unwrap();
        tokio::fs::write(src.join("scripts/kconfig"), "conf").await.unwrap();

        let tarball = dir.path().join("busybox-1.37.0.tar.gz");
        pack_tar_gz(&src, "busybox-1.37.0", &tarball).await;

        let dest = dir.path().join("out");
        Extractor::new().extract(&tarball, &dest).await.unwrap();

        let makefile = tokio::fs::read_to_string(dest.join("busybox-1.37.0/Makefile"))
            .await
            .unwrap();
        assert_eq!(makefile, "all:\n");
        assert!(dest.join("busybox-1.37.0/scripts/kconfig").is_file());
    }

    #[tokio::test]
    async fn unknown_archive_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("busybox.zip");
        tokio::fs::write(&archive, b"PK").await.unwrap();

        let err = Extractor::new()
            .extract(&archive, dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("couldn't guess archive type"));
    }
}
