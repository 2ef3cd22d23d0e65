pub mod ftp_snapshot;

pub use ftp_snapshot::FtpSnapshotSource;
