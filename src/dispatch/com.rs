//! Windows automation runtime over COM
//!
//! Thin wrappers over CoInitializeEx / OleInitialize, CLSID lookup,
//! CoCreateInstance and IDispatch. Values cross as VARIANTs built from and
//! read into `TypedValue`.

use std::ffi::c_void;
use std::iter::once;
use std::ptr::{self, NonNull};

use winapi::shared::guiddef::GUID;
use winapi::shared::minwindef::UINT;
use winapi::shared::wtypes::BSTR;
use winapi::shared::wtypesbase::LPOLESTR;
use winapi::um::combaseapi::{
    CLSIDFromProgID, CLSIDFromString, CoCreateInstance, CoInitializeEx, CoUninitialize,
    CLSCTX_ALL,
};
use winapi::um::oaidl::{IDispatch, DISPID, DISPPARAMS, EXCEPINFO, VARIANT};
use winapi::um::objbase::{COINIT_APARTMENTTHREADED, COINIT_MULTITHREADED};
use winapi::um::ole2::{OleInitialize, OleUninitialize};
use winapi::um::oleauto::{SysAllocStringLen, SysFreeString, SysStringLen, VariantClear, VariantInit};
use winapi::um::winnls::GetUserDefaultLCID;
use winapi::Interface;

use super::runtime::{ApartmentModel, AutomationRuntime, ClassId};
use super::{Dispatch, DispParams, ExceptionInfo, InvokeError, Locale, MemberId, MemberKind};
use crate::errors::Hresult;
use crate::interop::{TypedValue, VarType};
use crate::logging::trace;

const IID_NULL: GUID = GUID {
    Data1: 0,
    Data2: 0,
    Data3: 0,
    Data4: [0; 8],
};

fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(once(0)).collect()
}

impl From<GUID> for ClassId {
    fn from(guid: GUID) -> Self {
        ClassId::new(guid.Data1, guid.Data2, guid.Data3, guid.Data4)
    }
}

impl From<ClassId> for GUID {
    fn from(class: ClassId) -> Self {
        GUID {
            Data1: class.data1,
            Data2: class.data2,
            Data3: class.data3,
            Data4: class.data4,
        }
    }
}

/// The platform COM runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct ComRuntime;

impl AutomationRuntime for ComRuntime {
    fn initialize(&self, model: ApartmentModel) -> Hresult {
        let flags = match model {
            ApartmentModel::Multithreaded => COINIT_MULTITHREADED,
            ApartmentModel::ApartmentThreaded => COINIT_APARTMENTTHREADED,
        };
        Hresult(unsafe { CoInitializeEx(ptr::null_mut(), flags) })
    }

    fn uninitialize(&self) {
        unsafe { CoUninitialize() }
    }

    fn ole_initialize(&self) -> Hresult {
        Hresult(unsafe { OleInitialize(ptr::null_mut()) })
    }

    fn ole_uninitialize(&self) {
        unsafe { OleUninitialize() }
    }

    fn class_id_from_string(&self, literal: &str) -> Result<ClassId, Hresult> {
        let mut text = wide(literal);
        let mut guid = IID_NULL;
        let status = Hresult(unsafe { CLSIDFromString(text.as_mut_ptr(), &mut guid) });
        status.ok().map(|()| ClassId::from(guid))
    }

    fn class_id_from_prog_id(&self, prog_id: &str) -> Result<ClassId, Hresult> {
        let text = wide(prog_id);
        let mut guid = IID_NULL;
        let status = Hresult(unsafe { CLSIDFromProgID(text.as_ptr(), &mut guid) });
        status.ok().map(|()| ClassId::from(guid))
    }

    fn create_instance(&self, class: &ClassId) -> Result<Box<dyn Dispatch>, Hresult> {
        let clsid = GUID::from(*class);
        let mut raw: *mut c_void = ptr::null_mut();
        let status = Hresult(unsafe {
            CoCreateInstance(&clsid, ptr::null_mut(), CLSCTX_ALL, &IDispatch::uuidof(), &mut raw)
        });
        status.ok()?;
        let ptr = NonNull::new(raw.cast::<IDispatch>()).ok_or(Hresult::E_UNEXPECTED)?;
        trace!(target: "com", %class, "instance created");
        Ok(Box::new(ComDispatch { ptr }))
    }

    fn user_default_locale(&self) -> Locale {
        Locale(unsafe { GetUserDefaultLCID() })
    }
}

/// Owned IDispatch reference; released on drop
struct ComDispatch {
    ptr: NonNull<IDispatch>,
}

impl ComDispatch {
    fn raw(&self) -> &IDispatch {
        // SAFETY: the pointer came from CoCreateInstance and we hold a reference
        unsafe { self.ptr.as_ref() }
    }
}

impl Dispatch for ComDispatch {
    fn id_of_name(&self, name: &str, locale: Locale) -> Result<MemberId, Hresult> {
        let mut text = wide(name);
        let mut names: [LPOLESTR; 1] = [text.as_mut_ptr()];
        let mut id: DISPID = 0;
        let status = Hresult(unsafe {
            self.raw()
                .GetIDsOfNames(&IID_NULL, names.as_mut_ptr(), 1, locale.0, &mut id)
        });
        status.ok().map(|()| MemberId(id))
    }

    fn invoke(
        &self,
        member: MemberId,
        locale: Locale,
        kind: MemberKind,
        params: &DispParams,
    ) -> Result<TypedValue, InvokeError> {
        let mut args = VariantArgs::with_capacity(params.args.len());
        for (i, value) in params.args.iter().enumerate() {
            args.push(value)
                .map_err(|status| InvokeError::bad_argument(status, i as UINT))?;
        }
        let mut named: Vec<DISPID> = params.named_args.iter().map(|id| id.0).collect();

        let mut dispparams = DISPPARAMS {
            rgvarg: args.as_mut_ptr(),
            rgdispidNamedArgs: if named.is_empty() { ptr::null_mut() } else { named.as_mut_ptr() },
            cArgs: args.len() as UINT,
            cNamedArgs: named.len() as UINT,
        };

        let mut result = OwnedVariant::new();
        let mut excep: EXCEPINFO = unsafe { std::mem::zeroed() };
        let mut arg_err: UINT = 0;

        let status = Hresult(unsafe {
            self.raw().Invoke(
                member.0,
                &IID_NULL,
                locale.0,
                kind.flags(),
                &mut dispparams,
                result.as_mut_ptr(),
                &mut excep,
                &mut arg_err,
            )
        });

        if status == Hresult::DISP_E_EXCEPTION {
            return Err(InvokeError::exception(take_exception(&mut excep)));
        }
        if status.is_failure() {
            return Err(InvokeError::bad_argument(status, arg_err));
        }
        Ok(unsafe { read_variant(result.as_ptr()) })
    }
}

impl Drop for ComDispatch {
    fn drop(&mut self) {
        unsafe {
            self.raw().Release();
        }
    }
}

/// VARIANT cleared on drop
struct OwnedVariant(VARIANT);

impl OwnedVariant {
    fn new() -> Self {
        let mut v: VARIANT = unsafe { std::mem::zeroed() };
        unsafe { VariantInit(&mut v) };
        Self(v)
    }

    fn as_ptr(&self) -> *const VARIANT {
        &self.0
    }

    fn as_mut_ptr(&mut self) -> *mut VARIANT {
        &mut self.0
    }
}

impl Drop for OwnedVariant {
    fn drop(&mut self) {
        unsafe {
            VariantClear(&mut self.0);
        }
    }
}

/// Argument VARIANTs, cleared on drop
struct VariantArgs {
    items: Vec<VARIANT>,
}

impl VariantArgs {
    fn with_capacity(capacity: usize) -> Self {
        Self { items: Vec::with_capacity(capacity) }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn as_mut_ptr(&mut self) -> *mut VARIANT {
        if self.items.is_empty() {
            ptr::null_mut()
        } else {
            self.items.as_mut_ptr()
        }
    }

    fn push(&mut self, value: &TypedValue) -> Result<(), Hresult> {
        let mut v: VARIANT = unsafe { std::mem::zeroed() };
        unsafe {
            VariantInit(&mut v);
            let tagged = v.n1.n2_mut();
            let payload = &mut tagged.n3;
            let vt = match value {
                TypedValue::Empty => VarType::EMPTY,
                TypedValue::Null => VarType::NULL,
                TypedValue::Error(code) => {
                    *payload.scode_mut() = *code;
                    VarType::ERROR
                }
                TypedValue::Bool(b) => {
                    *payload.boolVal_mut() = if *b { -1 } else { 0 };
                    VarType::BOOL
                }
                TypedValue::I8(n) => {
                    *payload.cVal_mut() = *n;
                    VarType::I1
                }
                TypedValue::I16(n) => {
                    *payload.iVal_mut() = *n;
                    VarType::I2
                }
                TypedValue::I32(n) => {
                    *payload.lVal_mut() = *n;
                    VarType::I4
                }
                TypedValue::I64(n) => {
                    *payload.llVal_mut() = *n;
                    VarType::I8
                }
                TypedValue::U8(n) => {
                    *payload.bVal_mut() = *n;
                    VarType::UI1
                }
                TypedValue::U16(n) => {
                    *payload.uiVal_mut() = *n;
                    VarType::UI2
                }
                TypedValue::U32(n) => {
                    *payload.ulVal_mut() = *n;
                    VarType::UI4
                }
                TypedValue::U64(n) => {
                    *payload.ullVal_mut() = *n;
                    VarType::UI8
                }
                TypedValue::Int(n) => {
                    *payload.intVal_mut() = *n;
                    VarType::INT
                }
                TypedValue::UInt(n) => {
                    *payload.uintVal_mut() = *n;
                    VarType::UINT
                }
                TypedValue::F32(n) => {
                    *payload.fltVal_mut() = *n;
                    VarType::R4
                }
                TypedValue::F64(n) => {
                    *payload.dblVal_mut() = *n;
                    VarType::R8
                }
                TypedValue::String(text) => {
                    let units: Vec<u16> = text.encode_utf16().collect();
                    let bstr = SysAllocStringLen(units.as_ptr(), units.len() as UINT);
                    if bstr.is_null() {
                        return Err(Hresult::E_OUTOFMEMORY);
                    }
                    *payload.bstrVal_mut() = bstr;
                    VarType::BSTR
                }
                TypedValue::ByRef(_)
                | TypedValue::VariantRef(_)
                | TypedValue::ByRefArray
                | TypedValue::Other(_) => return Err(Hresult::DISP_E_BADVARTYPE),
            };
            tagged.vt = vt.0;
        }
        self.items.push(v);
        Ok(())
    }
}

impl Drop for VariantArgs {
    fn drop(&mut self) {
        for v in &mut self.items {
            unsafe {
                VariantClear(v);
            }
        }
    }
}

/// Copy a VARIANT into a `TypedValue`
///
/// # Safety
/// `v` must point to an initialized VARIANT.
unsafe fn read_variant(v: *const VARIANT) -> TypedValue {
    let tagged = (*v).n1.n2();
    let vt = VarType(tagged.vt);
    let payload = &tagged.n3 as *const _ as *const c_void;

    if vt.is_byref() {
        if vt.is_array() {
            return TypedValue::ByRefArray;
        }
        let target = *(payload as *const *const c_void);
        if target.is_null() {
            return TypedValue::Other(vt);
        }
        if vt.base() == VarType::VARIANT {
            return TypedValue::VariantRef(Box::new(read_variant(target as *const VARIANT)));
        }
        return TypedValue::ByRef(Box::new(read_scalar(vt.base(), target)));
    }
    read_scalar(vt, payload)
}

/// Read a value of type `vt` stored at `p`
///
/// # Safety
/// `p` must point to storage holding a value of type `vt`.
unsafe fn read_scalar(vt: VarType, p: *const c_void) -> TypedValue {
    match vt {
        VarType::EMPTY => TypedValue::Empty,
        VarType::NULL => TypedValue::Null,
        VarType::ERROR => TypedValue::Error(*(p as *const i32)),
        VarType::BOOL => TypedValue::Bool(*(p as *const i16) != 0),
        VarType::I1 => TypedValue::I8(*(p as *const i8)),
        VarType::I2 => TypedValue::I16(*(p as *const i16)),
        VarType::I4 => TypedValue::I32(*(p as *const i32)),
        VarType::I8 => TypedValue::I64(*(p as *const i64)),
        VarType::UI1 => TypedValue::U8(*(p as *const u8)),
        VarType::UI2 => TypedValue::U16(*(p as *const u16)),
        VarType::UI4 => TypedValue::U32(*(p as *const u32)),
        VarType::UI8 => TypedValue::U64(*(p as *const u64)),
        VarType::INT => TypedValue::Int(*(p as *const i32)),
        VarType::UINT => TypedValue::UInt(*(p as *const u32)),
        VarType::R4 => TypedValue::F32(*(p as *const f32)),
        VarType::R8 => TypedValue::F64(*(p as *const f64)),
        VarType::BSTR => TypedValue::String(bstr_to_string(*(p as *const BSTR))),
        other => TypedValue::Other(other),
    }
}

unsafe fn bstr_to_string(bstr: BSTR) -> String {
    if bstr.is_null() {
        return String::new();
    }
    let len = SysStringLen(bstr) as usize;
    String::from_utf16_lossy(std::slice::from_raw_parts(bstr, len))
}

/// Move the exception details out, freeing the strings
fn take_exception(excep: &mut EXCEPINFO) -> ExceptionInfo {
    unsafe {
        if let Some(fill) = excep.pfnDeferredFillIn {
            fill(excep);
        }
        let info = ExceptionInfo {
            wcode: excep.wCode,
            scode: excep.scode,
            source: (!excep.bstrSource.is_null()).then(|| bstr_to_string(excep.bstrSource)),
            description: (!excep.bstrDescription.is_null())
                .then(|| bstr_to_string(excep.bstrDescription)),
        };
        SysFreeString(excep.bstrSource);
        SysFreeString(excep.bstrDescription);
        SysFreeString(excep.bstrHelpFile);
        excep.bstrSource = ptr::null_mut();
        excep.bstrDescription = ptr::null_mut();
        excep.bstrHelpFile = ptr::null_mut();
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_round_trip() {
        let class: ClassId = "{00024500-0000-0000-C000-000000000046}".parse().unwrap();
        let guid = GUID::from(class);
        assert_eq!(guid.Data1, 0x0002_4500);
        assert_eq!(ClassId::from(guid), class);
    }

    #[test]
    fn test_variant_round_trip() {
        let mut args = VariantArgs::with_capacity(2);
        args.push(&TypedValue::String("héllo".into())).unwrap();
        args.push(&TypedValue::I64(-5)).unwrap();
        unsafe {
            assert_eq!(read_variant(&args.items[0]), TypedValue::String("héllo".into()));
            assert_eq!(read_variant(&args.items[1]), TypedValue::I64(-5));
        }
        assert_eq!(args.push(&TypedValue::ByRefArray), Err(Hresult::DISP_E_BADVARTYPE));
    }

    #[test]
    fn test_initialize_pairs() {
        let runtime = ComRuntime;
        assert!(runtime.initialize(ApartmentModel::Multithreaded).is_success());
        runtime.uninitialize();
    }
}
