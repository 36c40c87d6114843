// ==========================================
// 商品目录库存后端 - 文件解析器实现
// ==========================================
// 支持: CSV (.csv，流式) / Excel (.xlsx/.xls/.ods，首个工作表)
// 流程: 结构预检（单遍、常量内存）→ 回到开头 → 流式产出 RawRow
// 红线: 文件级错误必须在预检阶段暴露，早于任何行结果
// ==========================================

use crate::domain::import::RawRow;
use crate::importer::catalog_importer_trait::{DataCleaner as _, RowIter, RowSource};
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::error::MalformedInputError;
use crate::importer::schema::CsvDialect;
use calamine::{open_workbook_auto, open_workbook_auto_from_rs, Data, Range, Reader};
use csv::ByteRecord;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// 结构预检结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreScan {
    /// 表头（dialect 声明无表头时为 None）
    pub header: Option<Vec<String>>,
    /// 数据行数（不含表头与空白行）
    pub data_rows: usize,
}

// ==========================================
// RowSequencer - 行编号
// ==========================================
// 空白行不编号；声明有表头时首个非空白行为表头
enum SequencedRow {
    Blank,
    Header(Vec<String>),
    Data(RawRow),
}

struct RowSequencer {
    expect_header: bool,
    next_index: usize,
    cleaner: DataCleaner,
}

impl RowSequencer {
    fn new(dialect: &CsvDialect) -> Self {
        Self {
            expect_header: dialect.has_header,
            next_index: 1,
            cleaner: DataCleaner,
        }
    }

    fn push(&mut self, line: u64, cells: Vec<String>) -> SequencedRow {
        if self.cleaner.is_blank_row(&cells) {
            return SequencedRow::Blank;
        }
        if self.expect_header {
            self.expect_header = false;
            return SequencedRow::Header(cells.iter().map(|c| c.trim().to_string()).collect());
        }
        let row = RawRow::new(self.next_index, line, cells);
        self.next_index += 1;
        SequencedRow::Data(row)
    }
}

// ==========================================
// QuoteTracker - 引号状态跟踪读取包装
// ==========================================
// 按 CSV 规则跟踪字段是否处于引号内：只有字段首字节为引号才开启引号字段，
// 未加引号字段中的引号是普通字符。读到文件末尾时仍在引号内即为未闭合。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    FieldStart,
    Unquoted,
    Quoted,
    // 引号字段内遇到引号：可能是闭合，也可能是 `""` 转义的前半
    QuoteInQuoted,
}

struct QuoteTracker<R> {
    inner: R,
    quote: u8,
    delimiter: u8,
    state: QuoteState,
    line: u64,
    opened_at: u64,
    bom_matched: usize,
    at_start: bool,
}

impl<R> QuoteTracker<R> {
    fn new(inner: R, dialect: &CsvDialect, quote: u8) -> Self {
        Self {
            inner,
            quote,
            delimiter: dialect.delimiter,
            state: QuoteState::FieldStart,
            line: 1,
            opened_at: 0,
            bom_matched: 0,
            at_start: true,
        }
    }

    fn feed(&mut self, b: u8) {
        // 文件开头的 UTF-8 BOM 不属于首个字段
        if self.at_start {
            if self.bom_matched < UTF8_BOM.len() && b == UTF8_BOM[self.bom_matched] {
                self.bom_matched += 1;
                return;
            }
            self.at_start = false;
        }

        let terminator = b == b'\n' || b == b'\r';
        self.state = match self.state {
            QuoteState::FieldStart | QuoteState::Unquoted
                if b == self.delimiter || terminator =>
            {
                QuoteState::FieldStart
            }
            QuoteState::FieldStart if b == self.quote => {
                self.opened_at = self.line;
                QuoteState::Quoted
            }
            QuoteState::FieldStart | QuoteState::Unquoted => QuoteState::Unquoted,
            QuoteState::Quoted if b == self.quote => QuoteState::QuoteInQuoted,
            QuoteState::Quoted => QuoteState::Quoted,
            QuoteState::QuoteInQuoted if b == self.quote => QuoteState::Quoted,
            QuoteState::QuoteInQuoted if b == self.delimiter || terminator => QuoteState::FieldStart,
            QuoteState::QuoteInQuoted => QuoteState::Unquoted,
        };
        if b == b'\n' {
            self.line += 1;
        }
    }

    /// 输入结束后仍处于引号字段内时，返回该字段开始的行号
    fn unclosed_since(&self) -> Option<u64> {
        (self.state == QuoteState::Quoted).then_some(self.opened_at)
    }
}

impl<R: Read> Read for QuoteTracker<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        for &b in &buf[..n] {
            self.feed(b);
        }
        Ok(n)
    }
}

/// 解码一条记录（UTF-8，首条记录去 BOM）
fn decode_record(
    record: &ByteRecord,
    strip_bom: bool,
) -> Result<Vec<String>, MalformedInputError> {
    let line = record.position().map(|p| p.line()).unwrap_or(0);
    record
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let field = if strip_bom && i == 0 {
                field.strip_prefix(UTF8_BOM).unwrap_or(field)
            } else {
                field
            };
            std::str::from_utf8(field)
                .map(str::to_string)
                .map_err(|_| MalformedInputError::Encoding { line })
        })
        .collect()
}

// ==========================================
// CsvSource - 可回绕的 CSV 输入
// ==========================================
pub struct CsvSource<R> {
    reader: R,
}

impl<R: Read + Seek + Send + 'static> CsvSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read + Seek + Send + 'static> RowSource for CsvSource<R> {
    fn pre_scan(&mut self, dialect: &CsvDialect) -> Result<PreScan, MalformedInputError> {
        self.reader.seek(SeekFrom::Start(0))?;

        let tracker = QuoteTracker::new(&mut self.reader, dialect, dialect.quote.unwrap_or(b'"'));
        let mut reader = dialect.csv_reader_builder().from_reader(tracker);

        let mut sequencer = RowSequencer::new(dialect);
        let mut record = ByteRecord::new();
        let mut header = None;
        let mut data_rows = 0usize;
        let mut non_blank = 0usize;
        let mut first = true;

        while reader.read_byte_record(&mut record)? {
            let cells = decode_record(&record, first)?;
            first = false;
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            match sequencer.push(line, cells) {
                SequencedRow::Blank => {}
                SequencedRow::Header(h) => {
                    header = Some(h);
                    non_blank += 1;
                }
                SequencedRow::Data(_) => {
                    data_rows += 1;
                    non_blank += 1;
                }
            }
        }

        let tracker = reader.into_inner();
        if dialect.quote.is_some() {
            if let Some(line) = tracker.unclosed_since() {
                return Err(MalformedInputError::UnbalancedQuote { line });
            }
        }
        if non_blank == 0 {
            return Err(MalformedInputError::EmptyInput);
        }

        Ok(PreScan { header, data_rows })
    }

    fn into_rows(mut self: Box<Self>, dialect: &CsvDialect) -> Result<RowIter, MalformedInputError> {
        self.reader.seek(SeekFrom::Start(0))?;
        let reader = dialect.csv_reader_builder().from_reader(self.reader);

        Ok(Box::new(CsvRows {
            reader,
            record: ByteRecord::new(),
            sequencer: RowSequencer::new(dialect),
            first: true,
            done: false,
        }))
    }
}

/// CSV 数据行的惰性序列（单遍、不可重启）
pub struct CsvRows<R> {
    reader: csv::Reader<R>,
    record: ByteRecord,
    sequencer: RowSequencer,
    first: bool,
    done: bool,
}

impl<R: Read> Iterator for CsvRows<R> {
    type Item = Result<RawRow, MalformedInputError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.reader.read_byte_record(&mut self.record) {
                Ok(false) => self.done = true,
                Ok(true) => {
                    let cells = match decode_record(&self.record, self.first) {
                        Ok(cells) => cells,
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    };
                    self.first = false;
                    let line = self.record.position().map(|p| p.line()).unwrap_or(0);

                    if let SequencedRow::Data(row) = self.sequencer.push(line, cells) {
                        return Some(Ok(row));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        None
    }
}

// ==========================================
// ExcelSource - 工作簿输入（首个工作表）
// ==========================================
// calamine 整表加载，非流式
pub struct ExcelSource {
    rows: Vec<(u64, Vec<String>)>,
}

impl ExcelSource {
    /// 从文件打开（按扩展名识别 xlsx/xls/ods）
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MalformedInputError> {
        let mut workbook = open_workbook_auto(path)?;
        let range = Self::first_sheet(&mut workbook)?;
        Ok(Self::from_range(&range))
    }

    /// 从内存字节打开（上传场景）
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, MalformedInputError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
        let range = Self::first_sheet(&mut workbook)?;
        Ok(Self::from_range(&range))
    }

    fn first_sheet<RS: Read + Seek>(
        workbook: &mut calamine::Sheets<RS>,
    ) -> Result<Range<Data>, MalformedInputError> {
        workbook
            .worksheet_range_at(0)
            .ok_or_else(|| MalformedInputError::Workbook("工作簿无工作表".to_string()))?
            .map_err(MalformedInputError::from)
    }

    fn from_range(range: &Range<Data>) -> Self {
        let first_row = range.start().map(|(row, _)| row as u64).unwrap_or(0);
        let rows = range
            .rows()
            .enumerate()
            .map(|(offset, cells)| {
                (
                    first_row + offset as u64 + 1,
                    cells.iter().map(|cell| cell.to_string()).collect(),
                )
            })
            .collect();
        Self { rows }
    }
}

impl RowSource for ExcelSource {
    fn pre_scan(&mut self, dialect: &CsvDialect) -> Result<PreScan, MalformedInputError> {
        let mut sequencer = RowSequencer::new(dialect);
        let mut header = None;
        let mut data_rows = 0usize;
        let mut non_blank = 0usize;

        for (line, cells) in &self.rows {
            match sequencer.push(*line, cells.clone()) {
                SequencedRow::Blank => {}
                SequencedRow::Header(h) => {
                    header = Some(h);
                    non_blank += 1;
                }
                SequencedRow::Data(_) => {
                    data_rows += 1;
                    non_blank += 1;
                }
            }
        }

        if non_blank == 0 {
            return Err(MalformedInputError::EmptyInput);
        }
        Ok(PreScan { header, data_rows })
    }

    fn into_rows(self: Box<Self>, dialect: &CsvDialect) -> Result<RowIter, MalformedInputError> {
        let mut sequencer = RowSequencer::new(dialect);
        let rows = self
            .rows
            .into_iter()
            .filter_map(move |(line, cells)| match sequencer.push(line, cells) {
                SequencedRow::Data(row) => Some(Ok(row)),
                _ => None,
            });
        Ok(Box::new(rows))
    }
}

/// 按扩展名打开文件输入
pub fn open_source(path: &Path) -> Result<Box<dyn RowSource>, MalformedInputError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "csv" | "txt" => Ok(Box::new(CsvSource::new(std::fs::File::open(path)?))),
        "xlsx" | "xlsm" | "xls" | "ods" => Ok(Box::new(ExcelSource::open(path)?)),
        _ => Err(MalformedInputError::UnsupportedFormat(ext)),
    }
}

/// 由上传字节构造输入（按文件名扩展名识别，缺省按 CSV）
pub fn source_from_bytes(
    file_name: Option<&str>,
    bytes: Vec<u8>,
) -> Result<Box<dyn RowSource>, MalformedInputError> {
    let ext = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|e| e.to_str())
        .unwrap_or("csv")
        .to_lowercase();

    match ext.as_str() {
        "csv" | "txt" => Ok(Box::new(CsvSource::new(Cursor::new(bytes)))),
        "xlsx" | "xlsm" | "xls" | "ods" => Ok(Box::new(ExcelSource::from_bytes(bytes)?)),
        _ => Err(MalformedInputError::UnsupportedFormat(ext)),
    }
}

/// 在阻塞线程上执行结构预检（输入源随结果一并返回）
pub async fn pre_scan_blocking(
    mut source: Box<dyn RowSource>,
    dialect: CsvDialect,
) -> Result<(Box<dyn RowSource>, Result<PreScan, MalformedInputError>), tokio::task::JoinError> {
    tokio::task::spawn_blocking(move || {
        let scan = source.pre_scan(&dialect);
        (source, scan)
    })
    .await
}

/// 在阻塞线程上流式解析，经有界通道交给管道
///
/// # 参数
/// - buffer: 通道容量（行数），解析最多领先管道这么多行
///
/// # 说明
/// - 接收端关闭（导入取消）时解析线程随即退出
/// - 出现错误后不再继续产出
pub fn spawn_row_stream(
    source: Box<dyn RowSource>,
    dialect: CsvDialect,
    buffer: usize,
) -> (
    mpsc::Receiver<Result<RawRow, MalformedInputError>>,
    JoinHandle<()>,
) {
    let (tx, rx) = mpsc::channel(buffer.max(1));

    let handle = tokio::task::spawn_blocking(move || {
        let rows = match source.into_rows(&dialect) {
            Ok(rows) => rows,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };

        for item in rows {
            let stop = item.is_err();
            if tx.blocking_send(item).is_err() || stop {
                break;
            }
        }
    });

    (rx, handle)
}
