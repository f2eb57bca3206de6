use arrayvec::ArrayString;

/// The maximum length in bytes of a language code returned by [`ControlRequest::GetLang`].
pub const LANG_CAPACITY: usize = 40;

/// The result of a [`ControlRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatus {
    /// The request was handled and its output (if any) was written back.
    Ok,
    /// The stream does not know this request.
    Unsupported,
    /// The stream knows the request but failed to carry it out.
    Error,
}

impl ControlStatus {
    pub(crate) fn to_raw(self) -> u8 {
        match self {
            ControlStatus::Ok => 0,
            ControlStatus::Unsupported => 1,
            ControlStatus::Error => 2,
        }
    }

    pub(crate) fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ControlStatus::Ok,
            1 => ControlStatus::Unsupported,
            _ => ControlStatus::Error,
        }
    }
}

/// Which kind of track a [`LangRequest`] asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LangKind {
    Audio,
    Subtitle,
}

/// Asks the stream for the language of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LangRequest {
    pub kind: LangKind,
    /// The stream-specific track id.
    pub id: i32,
    /// Filled in by the stream.
    pub lang: ArrayString<LANG_CAPACITY>,
}

impl LangRequest {
    pub fn new(kind: LangKind, id: i32) -> Self {
        Self {
            kind,
            id,
            lang: ArrayString::new(),
        }
    }
}

/// An out-of-band request to a [`Stream`].
///
/// Every variant carries its argument, which is an input for the `Seek*`/`Set*`
/// requests and an output slot for the `Get*` requests. The value is plain data
/// so it can be handed to a worker living in another process.
///
/// [`Stream`]: crate::Stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlRequest {
    /// Seek to a time in seconds.
    SeekToTime(f64),
    /// Seek to the start of a chapter.
    SeekToChapter(u32),
    /// Switch to another camera angle.
    SetAngle(u32),
    /// Switch to another title.
    SetCurrentTitle(u32),
    /// The duration in seconds.
    GetTimeLength(f64),
    /// The time in seconds at the current stream position.
    GetCurrentTime(f64),
    GetNumChapters(u32),
    GetCurrentChapter(u32),
    GetNumTitles(u32),
    GetCurrentTitle(u32),
    GetNumAngles(u32),
    GetAngle(u32),
    GetAspectRatio(f64),
    /// The stream size in bytes.
    GetSize(u64),
    GetLang(LangRequest),
    /// Answered with [`ControlStatus::Ok`] if the stream keeps its own timeline.
    ManagesTimeline,
}

impl ControlRequest {
    /// A stable positive number identifying the request kind.
    pub fn code(&self) -> i32 {
        match self {
            ControlRequest::SeekToTime(_) => 1,
            ControlRequest::SeekToChapter(_) => 2,
            ControlRequest::SetAngle(_) => 3,
            ControlRequest::SetCurrentTitle(_) => 4,
            ControlRequest::GetTimeLength(_) => 5,
            ControlRequest::GetCurrentTime(_) => 6,
            ControlRequest::GetNumChapters(_) => 7,
            ControlRequest::GetCurrentChapter(_) => 8,
            ControlRequest::GetNumTitles(_) => 9,
            ControlRequest::GetCurrentTitle(_) => 10,
            ControlRequest::GetNumAngles(_) => 11,
            ControlRequest::GetAngle(_) => 12,
            ControlRequest::GetAspectRatio(_) => 13,
            ControlRequest::GetSize(_) => 14,
            ControlRequest::GetLang(_) => 15,
            ControlRequest::ManagesTimeline => 16,
        }
    }

    /// Whether a successful request moves the stream, which invalidates
    /// everything the cache holds.
    pub fn moves_stream(&self) -> bool {
        matches!(
            self,
            ControlRequest::SeekToTime(_)
                | ControlRequest::SeekToChapter(_)
                | ControlRequest::SetAngle(_)
                | ControlRequest::SetCurrentTitle(_)
        )
    }
}
