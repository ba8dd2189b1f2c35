use crate::config::{HashAlgorithm, Settings};
use crate::constants::transfer::{NO_HASH_MARKER, PART_SUFFIX};
use crate::errors::ToolError;
use crate::managers::ssh::run_command_blocking;
use crate::managers::{resolve_target, shell_quote};
use crate::services::keystore::CredentialStore;
use crate::services::logger::Logger;
use crate::services::pool::HostKey;
use crate::services::sessions::SshPool;
use crate::services::validation::Validation;
use md5::Md5;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use ssh2::{OpenFlags, OpenType, RenameFlags, Session};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

static MD5_HEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-fA-F0-9]{32}\b").expect("md5 hex"));
static SHA256_HEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-fA-F0-9]{64}\b").expect("sha256 hex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HashKind {
    Md5,
    Sha256,
}

impl HashKind {
    fn as_str(self) -> &'static str {
        match self {
            HashKind::Md5 => "md5",
            HashKind::Sha256 => "sha256",
        }
    }
}

#[derive(Debug, Default)]
struct HashReport {
    md5_local: Option<String>,
    md5_remote: Option<String>,
    sha256_local: Option<String>,
    sha256_remote: Option<String>,
}

impl HashReport {
    fn verified(&self) -> bool {
        let md5_ok = match (&self.md5_local, &self.md5_remote) {
            (Some(local), Some(remote)) => local == remote,
            (None, None) => true,
            _ => false,
        };
        let sha_ok = match (&self.sha256_local, &self.sha256_remote) {
            (Some(local), Some(remote)) => local == remote,
            (None, None) => true,
            _ => false,
        };
        let any = self.md5_local.is_some() || self.sha256_local.is_some();
        any && md5_ok && sha_ok
    }

    fn mismatch_details(&self) -> Value {
        serde_json::json!({
            "code": "hash_mismatch",
            "md5_local": self.md5_local,
            "md5_remote": self.md5_remote,
            "sha256_local": self.sha256_local,
            "sha256_remote": self.sha256_remote,
        })
    }

    fn fill(&self, out: &mut serde_json::Map<String, Value>) {
        if self.md5_local.is_some() || self.md5_remote.is_some() {
            out.insert("md5_local".to_string(), to_value(&self.md5_local));
            out.insert("md5_remote".to_string(), to_value(&self.md5_remote));
            out.insert(
                "md5_match".to_string(),
                Value::Bool(self.md5_local.is_some() && self.md5_local == self.md5_remote),
            );
        }
        if self.sha256_local.is_some() || self.sha256_remote.is_some() {
            out.insert("sha256_local".to_string(), to_value(&self.sha256_local));
            out.insert("sha256_remote".to_string(), to_value(&self.sha256_remote));
            out.insert(
                "sha256_match".to_string(),
                Value::Bool(self.sha256_local.is_some() && self.sha256_local == self.sha256_remote),
            );
        }
    }
}

fn to_value(opt: &Option<String>) -> Value {
    opt.clone().map(Value::String).unwrap_or(Value::Null)
}

/// Chunked SFTP transfers with resume, `<path>.part` staging and post-copy
/// hash verification.
pub struct TransferManager {
    logger: Logger,
    settings: Settings,
    validation: Validation,
    pool: SshPool,
    keystore: Arc<CredentialStore>,
}

impl TransferManager {
    pub fn new(
        logger: Logger,
        settings: Settings,
        validation: Validation,
        pool: SshPool,
        keystore: Arc<CredentialStore>,
    ) -> Self {
        Self {
            logger: logger.child("transfer"),
            settings,
            validation,
            pool,
            keystore,
        }
    }

    fn transfer_params(&self, args: &Value) -> Result<(HashAlgorithm, usize, bool), ToolError> {
        let algorithm = match args.get("hash_algorithm").and_then(|v| v.as_str()) {
            None => self.settings.hash_algorithm,
            Some("none") => HashAlgorithm::None,
            Some("md5") => HashAlgorithm::Md5,
            Some("sha256") => HashAlgorithm::Sha256,
            Some("both") => HashAlgorithm::Both,
            Some(other) => {
                return Err(ToolError::config(format!(
                    "hash_algorithm must be one of none, md5, sha256, both (got {:?})",
                    other
                )))
            }
        };
        let chunk_size = self
            .validation
            .ensure_positive_int(args.get("chunk_size"), "chunk_size")?
            .map(|n| n as usize)
            .unwrap_or(self.settings.default_chunk_size);
        let resume = self.validation.ensure_bool(args.get("resume"), false);
        Ok((algorithm, chunk_size, resume))
    }

    pub async fn upload(&self, args: &Value) -> Result<Value, ToolError> {
        let (key, credential) = resolve_target(&self.validation, &self.keystore, args)?;
        let local_path = self.validation.ensure_string(args.get("local_path"), "local_path")?;
        let remote_path = self.validation.ensure_string(args.get("remote_path"), "remote_path")?;
        let (algorithm, chunk_size, resume) = self.transfer_params(args)?;
        let timeout = Duration::from_secs(self.settings.command_timeout_seconds);

        let mut lease = self.pool.lease(&key, &credential).await?;
        let transport = lease
            .take_transport()
            .ok_or_else(|| ToolError::execution("leased transport unavailable"))?;

        let job = UploadJob {
            local_path: local_path.clone(),
            remote_path: remote_path.clone(),
            chunk_size,
            resume,
            algorithm,
            timeout,
        };
        let joined = tokio::task::spawn_blocking(move || {
            let result = upload_blocking(&transport.conn, &job);
            (transport, result)
        })
        .await;

        let result = match joined {
            Ok((transport, result)) => {
                lease.put_back(transport);
                match &result {
                    Ok(_) => lease.release(),
                    // failed transfers may have broken the SFTP channel
                    Err(_) => lease.discard(),
                }
                result
            }
            Err(_) => {
                lease.release();
                Err(ToolError::transfer("upload task failed"))
            }
        };

        let outcome = result.map_err(|err| err.with_host(key.host.clone()))?;
        self.logger.info(
            "upload complete",
            Some(&serde_json::json!({
                "target": key.to_string(),
                "remote_path": remote_path,
                "bytes": outcome.bytes_transferred,
            })),
        );
        Ok(outcome.into_value(&key, "upload", &local_path, &remote_path, chunk_size))
    }

    pub async fn download(&self, args: &Value) -> Result<Value, ToolError> {
        let (key, credential) = resolve_target(&self.validation, &self.keystore, args)?;
        let remote_path = self.validation.ensure_string(args.get("remote_path"), "remote_path")?;
        let local_path = self.validation.ensure_string(args.get("local_path"), "local_path")?;
        let (algorithm, chunk_size, resume) = self.transfer_params(args)?;
        let timeout = Duration::from_secs(self.settings.command_timeout_seconds);

        let mut lease = self.pool.lease(&key, &credential).await?;
        let transport = lease
            .take_transport()
            .ok_or_else(|| ToolError::execution("leased transport unavailable"))?;

        let job = DownloadJob {
            remote_path: remote_path.clone(),
            local_path: local_path.clone(),
            chunk_size,
            resume,
            algorithm,
            timeout,
        };
        let joined = tokio::task::spawn_blocking(move || {
            let result = download_blocking(&transport.conn, &job);
            (transport, result)
        })
        .await;

        let result = match joined {
            Ok((transport, result)) => {
                lease.put_back(transport);
                match &result {
                    Ok(_) => lease.release(),
                    Err(_) => lease.discard(),
                }
                result
            }
            Err(_) => {
                lease.release();
                Err(ToolError::transfer("download task failed"))
            }
        };

        let outcome = result.map_err(|err| err.with_host(key.host.clone()))?;
        self.logger.info(
            "download complete",
            Some(&serde_json::json!({
                "target": key.to_string(),
                "remote_path": remote_path,
                "bytes": outcome.bytes_transferred,
            })),
        );
        Ok(outcome.into_value(&key, "download", &local_path, &remote_path, chunk_size))
    }

    pub async fn file_info(&self, args: &Value) -> Result<Value, ToolError> {
        let (key, credential) = resolve_target(&self.validation, &self.keystore, args)?;
        let path = self.validation.ensure_string(args.get("path"), "path")?;

        let mut lease = self.pool.lease(&key, &credential).await?;
        let transport = lease
            .take_transport()
            .ok_or_else(|| ToolError::execution("leased transport unavailable"))?;
        let path_clone = path.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let result = stat_blocking(&transport.conn, &path_clone);
            (transport, result)
        })
        .await;

        let result = match joined {
            Ok((transport, result)) => {
                lease.put_back(transport);
                match &result {
                    Ok(_) => lease.release(),
                    Err(_) => lease.discard(),
                }
                result
            }
            Err(_) => {
                lease.release();
                Err(ToolError::transfer("stat task failed"))
            }
        };
        let stat = result.map_err(|err| err.with_host(key.host.clone()))?;
        Ok(serde_json::json!({
            "host": key.host,
            "port": key.port,
            "path": path,
            "size": stat.size,
            "permissions": stat.perm,
            "mtime": stat.mtime,
            "atime": stat.atime,
            "is_dir": stat.is_dir(),
            "is_file": stat.is_file(),
        }))
    }
}

struct UploadJob {
    local_path: String,
    remote_path: String,
    chunk_size: usize,
    resume: bool,
    algorithm: HashAlgorithm,
    timeout: Duration,
}

struct DownloadJob {
    remote_path: String,
    local_path: String,
    chunk_size: usize,
    resume: bool,
    algorithm: HashAlgorithm,
    timeout: Duration,
}

struct TransferOutcome {
    bytes_transferred: u64,
    total_bytes: u64,
    resumed: bool,
    hashes: HashReport,
    verified: bool,
    algorithm: HashAlgorithm,
}

impl TransferOutcome {
    fn into_value(
        self,
        key: &HostKey,
        direction: &str,
        local_path: &str,
        remote_path: &str,
        chunk_size: usize,
    ) -> Value {
        let mut out = serde_json::Map::new();
        out.insert("host".to_string(), Value::String(key.host.clone()));
        out.insert("port".to_string(), Value::Number(key.port.into()));
        out.insert("direction".to_string(), Value::String(direction.to_string()));
        out.insert("local_path".to_string(), Value::String(local_path.to_string()));
        out.insert("remote_path".to_string(), Value::String(remote_path.to_string()));
        out.insert(
            "bytes_transferred".to_string(),
            Value::Number(self.bytes_transferred.into()),
        );
        out.insert("total_bytes".to_string(), Value::Number(self.total_bytes.into()));
        out.insert("chunk_size".to_string(), Value::Number((chunk_size as u64).into()));
        out.insert("resumed".to_string(), Value::Bool(self.resumed));
        out.insert("verified".to_string(), Value::Bool(self.verified));
        out.insert(
            "hash_algorithm".to_string(),
            Value::String(
                match self.algorithm {
                    HashAlgorithm::None => "none",
                    HashAlgorithm::Md5 => "md5",
                    HashAlgorithm::Sha256 => "sha256",
                    HashAlgorithm::Both => "both",
                }
                .to_string(),
            ),
        );
        self.hashes.fill(&mut out);
        Value::Object(out)
    }
}

/// Resume offset sanity: a destination larger than the source means the two
/// files cannot be the same; refusing beats silent truncation.
fn check_resume_offset(existing: u64, total: u64) -> Result<(u64, bool), ToolError> {
    if existing > total {
        return Err(ToolError::transfer(format!(
            "Resume refused: partial destination ({} bytes) exceeds source ({} bytes)",
            existing, total
        ))
        .with_details(serde_json::json!({"code": "resume_mismatch"})));
    }
    Ok((existing, existing > 0))
}

fn upload_blocking(session: &Session, job: &UploadJob) -> Result<TransferOutcome, ToolError> {
    session.set_blocking(true);
    let local = Path::new(&job.local_path);
    let metadata = std::fs::metadata(local).map_err(|err| {
        ToolError::transfer(format!("local_path must be a readable file: {}", err))
    })?;
    if !metadata.is_file() {
        return Err(ToolError::transfer("local_path must be a regular file"));
    }
    let total_bytes = metadata.len();

    let sftp = session
        .sftp()
        .map_err(|err| ToolError::transfer(format!("Failed to open SFTP channel: {}", err)))?;
    let part_path = format!("{}{}", job.remote_path, PART_SUFFIX);

    let existing = if job.resume {
        sftp.stat(Path::new(&part_path))
            .ok()
            .and_then(|stat| stat.size)
            .unwrap_or(0)
    } else {
        0
    };
    let (offset, resumed) = check_resume_offset(existing, total_bytes)?;

    let mut bytes_transferred = 0u64;
    if offset < total_bytes || total_bytes == 0 {
        let flags = if resumed {
            OpenFlags::WRITE | OpenFlags::APPEND
        } else {
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE
        };
        let mut remote_file = sftp
            .open_mode(Path::new(&part_path), flags, 0o644, OpenType::File)
            .map_err(|err| {
                ToolError::transfer(format!("Failed to open {}: {}", part_path, err))
            })?;
        let mut local_file = std::fs::File::open(local)
            .map_err(|err| ToolError::transfer(format!("Failed to open local file: {}", err)))?;
        local_file
            .seek(SeekFrom::Start(offset))
            .map_err(|err| ToolError::transfer(format!("Seek failed: {}", err)))?;

        let mut buf = vec![0u8; job.chunk_size.max(1)];
        loop {
            let n = local_file
                .read(&mut buf)
                .map_err(|err| ToolError::transfer(format!("Local read failed: {}", err)))?;
            if n == 0 {
                break;
            }
            remote_file
                .write_all(&buf[..n])
                .map_err(|err| ToolError::transfer(format!("Remote write failed: {}", err)))?;
            bytes_transferred += n as u64;
        }
    }

    let hashes = verify_hashes(
        session,
        job.algorithm,
        local,
        &part_path,
        job.timeout,
    )?;
    if job.algorithm != HashAlgorithm::None && !hashes.verified() {
        if !job.resume {
            let _ = sftp.unlink(Path::new(&part_path));
        }
        return Err(ToolError::transfer("Hash verification failed after upload")
            .with_details(hashes.mismatch_details()));
    }

    finalize_remote(&sftp, &part_path, &job.remote_path)?;
    Ok(TransferOutcome {
        bytes_transferred,
        total_bytes,
        resumed,
        verified: job.algorithm != HashAlgorithm::None && hashes.verified(),
        hashes,
        algorithm: job.algorithm,
    })
}

fn download_blocking(session: &Session, job: &DownloadJob) -> Result<TransferOutcome, ToolError> {
    session.set_blocking(true);
    let sftp = session
        .sftp()
        .map_err(|err| ToolError::transfer(format!("Failed to open SFTP channel: {}", err)))?;
    let remote = Path::new(&job.remote_path);
    let stat = sftp.stat(remote).map_err(|err| {
        ToolError::transfer(format!("remote_path must be a readable file: {}", err))
    })?;
    let total_bytes = stat.size.unwrap_or(0);

    let local = Path::new(&job.local_path);
    if let Some(parent) = local.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|err| {
                ToolError::transfer(format!("Failed to create local directory: {}", err))
            })?;
        }
    }
    let part_path = format!("{}{}", job.local_path, PART_SUFFIX);

    let existing = if job.resume {
        std::fs::metadata(&part_path).map(|m| m.len()).unwrap_or(0)
    } else {
        0
    };
    let (offset, resumed) = check_resume_offset(existing, total_bytes)?;

    let mut bytes_transferred = 0u64;
    if offset < total_bytes || total_bytes == 0 {
        let mut remote_file = sftp
            .open(remote)
            .map_err(|err| ToolError::transfer(format!("Failed to open remote file: {}", err)))?;
        remote_file
            .seek(SeekFrom::Start(offset))
            .map_err(|err| ToolError::transfer(format!("Remote seek failed: {}", err)))?;
        let mut local_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(resumed)
            .truncate(!resumed)
            .open(&part_path)
            .map_err(|err| ToolError::transfer(format!("Failed to open {}: {}", part_path, err)))?;

        let mut buf = vec![0u8; job.chunk_size.max(1)];
        loop {
            let n = remote_file
                .read(&mut buf)
                .map_err(|err| ToolError::transfer(format!("Remote read failed: {}", err)))?;
            if n == 0 {
                break;
            }
            local_file
                .write_all(&buf[..n])
                .map_err(|err| ToolError::transfer(format!("Local write failed: {}", err)))?;
            bytes_transferred += n as u64;
        }
    }

    let hashes = verify_hashes(
        session,
        job.algorithm,
        Path::new(&part_path),
        &job.remote_path,
        job.timeout,
    )?;
    if job.algorithm != HashAlgorithm::None && !hashes.verified() {
        if !job.resume {
            let _ = std::fs::remove_file(&part_path);
        }
        return Err(ToolError::transfer("Hash verification failed after download")
            .with_details(hashes.mismatch_details()));
    }

    std::fs::rename(&part_path, local)
        .map_err(|err| ToolError::transfer(format!("Failed to finalize download: {}", err)))?;
    Ok(TransferOutcome {
        bytes_transferred,
        total_bytes,
        resumed,
        verified: job.algorithm != HashAlgorithm::None && hashes.verified(),
        hashes,
        algorithm: job.algorithm,
    })
}

fn stat_blocking(session: &Session, path: &str) -> Result<ssh2::FileStat, ToolError> {
    session.set_blocking(true);
    let sftp = session
        .sftp()
        .map_err(|err| ToolError::transfer(format!("Failed to open SFTP channel: {}", err)))?;
    sftp.stat(Path::new(path))
        .map_err(|err| ToolError::transfer(format!("stat {} failed: {}", path, err)))
}

fn finalize_remote(sftp: &ssh2::Sftp, part_path: &str, remote_path: &str) -> Result<(), ToolError> {
    let rename = sftp.rename(
        Path::new(part_path),
        Path::new(remote_path),
        Some(RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE),
    );
    if rename.is_ok() {
        return Ok(());
    }
    // Some servers refuse overwriting renames; unlink and retry once.
    let _ = sftp.unlink(Path::new(remote_path));
    sftp.rename(Path::new(part_path), Path::new(remote_path), None)
        .map_err(|err| ToolError::transfer(format!("Failed to finalize upload: {}", err)))
}

fn verify_hashes(
    session: &Session,
    algorithm: HashAlgorithm,
    local: &Path,
    remote: &str,
    timeout: Duration,
) -> Result<HashReport, ToolError> {
    let mut report = HashReport::default();
    if algorithm == HashAlgorithm::None {
        return Ok(report);
    }
    let (md5_local, sha256_local) = hash_local_file(local, algorithm)?;
    report.md5_local = md5_local;
    report.sha256_local = sha256_local;
    if algorithm.wants_md5() {
        report.md5_remote = Some(remote_hash(session, remote, HashKind::Md5, timeout)?);
    }
    if algorithm.wants_sha256() {
        report.sha256_remote = Some(remote_hash(session, remote, HashKind::Sha256, timeout)?);
    }
    Ok(report)
}

fn hash_local_file(
    path: &Path,
    algorithm: HashAlgorithm,
) -> Result<(Option<String>, Option<String>), ToolError> {
    let mut file = std::fs::File::open(path)
        .map_err(|err| ToolError::transfer(format!("Failed to open {} for hashing: {}", path.display(), err)))?;
    let mut md5 = algorithm.wants_md5().then(Md5::new);
    let mut sha256 = algorithm.wants_sha256().then(Sha256::new);
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|err| ToolError::transfer(format!("Hash read failed: {}", err)))?;
        if n == 0 {
            break;
        }
        if let Some(hasher) = md5.as_mut() {
            hasher.update(&buf[..n]);
        }
        if let Some(hasher) = sha256.as_mut() {
            hasher.update(&buf[..n]);
        }
    }
    Ok((
        md5.map(|hasher| hex::encode(hasher.finalize())),
        sha256.map(|hasher| hex::encode(hasher.finalize())),
    ))
}

/// Probes the remote hashing tools in a fixed order and prints a marker when
/// none exist, so the caller can distinguish "no tool" from "bad output".
fn build_remote_hash_command(path: &str, kind: HashKind) -> String {
    let quoted = shell_quote(path);
    let (tool, openssl_alg) = match kind {
        HashKind::Md5 => ("md5sum", "-md5"),
        HashKind::Sha256 => ("sha256sum", "-sha256"),
    };
    [
        "set -u".to_string(),
        format!("PATH_ARG={}", quoted),
        format!(
            "if command -v {tool} >/dev/null 2>&1; then {tool} -- \"$PATH_ARG\" 2>/dev/null | awk '{{print $1}}'; exit 0; fi",
            tool = tool
        ),
        format!(
            "if command -v openssl >/dev/null 2>&1; then openssl dgst {alg} \"$PATH_ARG\" 2>/dev/null | awk '{{print $NF}}'; exit 0; fi",
            alg = openssl_alg
        ),
        format!(
            "if command -v busybox >/dev/null 2>&1; then busybox {tool} \"$PATH_ARG\" 2>/dev/null | awk '{{print $1}}'; exit 0; fi",
            tool = tool
        ),
        format!("echo \"{}\"", NO_HASH_MARKER),
        "exit 127".to_string(),
    ]
    .join("\n")
}

fn parse_hash_output(text: &str, kind: HashKind) -> Option<String> {
    let re = match kind {
        HashKind::Md5 => &*MD5_HEX,
        HashKind::Sha256 => &*SHA256_HEX,
    };
    re.find(text).map(|m| m.as_str().to_lowercase())
}

fn remote_hash(
    session: &Session,
    remote_path: &str,
    kind: HashKind,
    timeout: Duration,
) -> Result<String, ToolError> {
    let command = build_remote_hash_command(remote_path, kind);
    let raw = run_command_blocking(session, &command, timeout)?;
    if raw.stdout.contains(NO_HASH_MARKER) || raw.exit_code == 127 {
        return Err(ToolError::transfer(format!(
            "No usable {} tool on remote host",
            kind.as_str()
        ))
        .with_details(serde_json::json!({"code": "hash_unsupported"})));
    }
    parse_hash_output(&raw.stdout, kind).ok_or_else(|| {
        ToolError::transfer(format!(
            "Unable to parse remote {} output",
            kind.as_str()
        ))
        .with_details(serde_json::json!({"stdout": raw.stdout, "stderr": raw.stderr}))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_file(contents: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("sshmux-test-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).expect("write temp file");
        path
    }

    #[test]
    fn local_hashes_match_known_digests() {
        let path = tmp_file(b"hello world");
        let (md5, sha256) = hash_local_file(&path, HashAlgorithm::Both).expect("hashes");
        assert_eq!(md5.as_deref(), Some("5eb63bbbe01eeed093cb22bb8f5acdc3"));
        assert_eq!(
            sha256.as_deref(),
            Some("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
        );
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn hash_selection_follows_algorithm() {
        let path = tmp_file(b"x");
        let (md5, sha256) = hash_local_file(&path, HashAlgorithm::Md5).expect("hashes");
        assert!(md5.is_some());
        assert!(sha256.is_none());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn remote_hash_command_tries_fallbacks_in_order() {
        let cmd = build_remote_hash_command("/tmp/file", HashKind::Md5);
        let md5sum = cmd.find("command -v md5sum").expect("md5sum probe");
        let openssl = cmd.find("command -v openssl").expect("openssl probe");
        let busybox = cmd.find("command -v busybox").expect("busybox probe");
        assert!(md5sum < openssl && openssl < busybox);
        assert!(cmd.contains(NO_HASH_MARKER));
        assert!(cmd.ends_with("exit 127"));
    }

    #[test]
    fn hash_output_parsing_rejects_noise() {
        assert_eq!(
            parse_hash_output("5eb63bbbe01eeed093cb22bb8f5acdc3  /tmp/f\n", HashKind::Md5),
            Some("5eb63bbbe01eeed093cb22bb8f5acdc3".to_string())
        );
        assert_eq!(parse_hash_output("md5sum: not found", HashKind::Md5), None);
        assert_eq!(
            parse_hash_output("5eb63bbbe01eeed093cb22bb8f5acdc3", HashKind::Sha256),
            None,
            "md5-length hex must not satisfy sha256"
        );
    }

    #[test]
    fn resume_offset_rejects_oversized_destination() {
        let err = check_resume_offset(100, 50).unwrap_err();
        assert_eq!(err.kind, crate::errors::ToolErrorKind::TransferError);
        assert_eq!(
            err.details
                .as_ref()
                .and_then(|d| d.get("code"))
                .and_then(|v| v.as_str()),
            Some("resume_mismatch")
        );
        assert_eq!(check_resume_offset(0, 50).unwrap(), (0, false));
        assert_eq!(check_resume_offset(10, 50).unwrap(), (10, true));
    }

    #[test]
    fn verified_requires_all_requested_hashes_to_match() {
        let mut report = HashReport::default();
        assert!(!report.verified(), "no hashes means nothing verified");
        report.md5_local = Some("a".to_string());
        report.md5_remote = Some("a".to_string());
        assert!(report.verified());
        report.sha256_local = Some("b".to_string());
        report.sha256_remote = Some("c".to_string());
        assert!(!report.verified());
    }
}
