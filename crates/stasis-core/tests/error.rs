//! Tests for error handling

use stasis_core::error::{MappingError, StasisError, StasisResult};
use stasis_core::types::Address;

#[test]
fn test_introspection_message()
{
    let error = StasisError::Introspection("cannot read mapping table".to_string());
    assert_eq!(error.to_string(), "Introspection failed: cannot read mapping table");
}

#[test]
fn test_corrupt_snapshot_message()
{
    let error = StasisError::CorruptSnapshot("at byte 8: truncated register name".to_string());
    assert!(error.to_string().starts_with("Corrupt snapshot:"));
    assert!(error.to_string().contains("byte 8"));
}

#[test]
fn test_restore_mapping_names_address()
{
    let error = StasisError::RestoreMapping {
        address: Address::new(0x7fff_0000),
        reason: "address space exhausted".to_string(),
    };
    let message = error.to_string();
    assert!(message.contains("0x000000007fff0000"));
    assert!(message.contains("address space exhausted"));
}

#[test]
fn test_mapping_error_is_transparent()
{
    let mapping = MappingError::new(Address::new(0x1000), 16, "not mapped");
    let error: StasisError = mapping.clone().into();

    assert!(matches!(error, StasisError::Mapping(ref inner) if *inner == mapping));
    assert_eq!(error.to_string(), mapping.to_string());
    assert_eq!(
        mapping.to_string(),
        "No usable mapping for 16 bytes at 0x0000000000001000: not mapped"
    );
}

#[test]
fn test_ptrace_error_message()
{
    let error = StasisError::Ptrace {
        operation: "PTRACE_GETREGS",
        details: "No such process".to_string(),
    };
    assert_eq!(error.to_string(), "ptrace PTRACE_GETREGS failed: No such process");
}

#[test]
fn test_process_not_found()
{
    let error = StasisError::ProcessNotFound(12345);
    assert!(error.to_string().contains("12345"));
}

#[test]
fn test_io_error_conversion()
{
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "checkpoint.bin");
    let error: StasisError = io_error.into();
    assert!(matches!(error, StasisError::Io(_)));
    assert!(error.to_string().contains("checkpoint.bin"));
}

#[test]
fn test_result_type_alias()
{
    fn returns_result() -> StasisResult<u32>
    {
        Ok(42)
    }

    fn returns_error() -> StasisResult<u32>
    {
        Err(StasisError::InvalidArgument("bad pid".to_string()))
    }

    assert_eq!(returns_result().unwrap(), 42);
    assert!(returns_error().is_err());
}

#[test]
fn test_errors_propagate_with_question_mark()
{
    fn write() -> Result<(), MappingError>
    {
        Err(MappingError::new(Address::new(0x2000), 4, "unmapped"))
    }

    fn restore() -> StasisResult<()>
    {
        write()?;
        Ok(())
    }

    assert!(matches!(restore(), Err(StasisError::Mapping(_))));
}
